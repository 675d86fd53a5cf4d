//! Command-line configuration for the `ngaro` driver.
//!
//! Parsing is kept free of process side effects so it can be unit tested;
//! the binary decides what to print and which exit code to use.

use crate::host::{RunOptions, StackDepths};
use crate::virtual_machine::Cell;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::image::{DEFAULT_IMAGE_SIZE, Endian, Image, decode_cells, parse_cells, swap_endian};
use crate::virtual_machine::stack::MAX_STACK_DEPTH;
use std::path::PathBuf;

pub const USAGE: &str = "\
Usage: ngaro [OPTIONS] <image>

Arguments:
  <image>                  Boot image file

Options:
  -s, --size <cells>       Image capacity in cells (default 50000)
      --data-depth <n>     Data stack depth (default 1024)
      --address-depth <n>  Address stack depth (default 1024)
      --format <fmt>       Image file format: binary | text (default binary)
      --swap-endian        Byte-swap every cell after loading
      --halt-on-wait       Halt at WAIT once pending output is written
  -h, --help               Print this help

Environment:
  NGARO_LOG                Log level: debug | info | warn | error | off (default info)";

/// Errors produced while parsing command-line arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing boot image path")]
    MissingImage,
    #[error("{flag} requires an argument")]
    MissingValue { flag: String },
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: String, value: String },
    #[error("unknown option {0}")]
    UnknownOption(String),
    #[error("unexpected argument {0}")]
    UnexpectedArgument(String),
}

/// How a boot image file encodes its cells.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ImageFormat {
    /// Raw little-endian 32-bit cells.
    #[default]
    Binary,
    /// Signed integers separated by commas and/or whitespace.
    Text,
}

/// Settings for one run of the machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub image_path: PathBuf,
    pub image_size: usize,
    pub depths: StackDepths,
    pub format: ImageFormat,
    pub swap_endian: bool,
    pub halt_on_wait: bool,
}

/// What the driver was asked to do.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Run(Config),
    Help,
}

impl Config {
    /// Default settings for booting `image_path`.
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            image_size: DEFAULT_IMAGE_SIZE,
            depths: StackDepths::default(),
            format: ImageFormat::default(),
            swap_endian: false,
            halt_on_wait: false,
        }
    }

    /// Machine settings handed to [`crate::host::run`].
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            depths: self.depths,
            halt_on_wait: self.halt_on_wait,
        }
    }

    /// Parses arguments, excluding the program name.
    pub fn from_args<I>(args: I) -> Result<Command, ConfigError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let mut image_path: Option<PathBuf> = None;
        let mut image_size = DEFAULT_IMAGE_SIZE;
        let mut depths = StackDepths::default();
        let mut format = ImageFormat::default();
        let mut swap = false;
        let mut halt_on_wait = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => return Ok(Command::Help),
                "-s" | "--size" => image_size = parse_count(&arg, args.next())?,
                "--data-depth" => depths.data = parse_depth(&arg, args.next())?,
                "--address-depth" => depths.address = parse_depth(&arg, args.next())?,
                "--format" => {
                    let value = required(&arg, args.next())?;
                    format = match value.as_str() {
                        "binary" => ImageFormat::Binary,
                        "text" => ImageFormat::Text,
                        _ => return Err(invalid(&arg, value)),
                    };
                }
                "--swap-endian" => swap = true,
                "--halt-on-wait" => halt_on_wait = true,
                other if other.starts_with('-') && other.len() > 1 => {
                    return Err(ConfigError::UnknownOption(arg));
                }
                _ => {
                    if image_path.is_some() {
                        return Err(ConfigError::UnexpectedArgument(arg));
                    }
                    image_path = Some(PathBuf::from(arg));
                }
            }
        }

        let image_path = image_path.ok_or(ConfigError::MissingImage)?;
        Ok(Command::Run(Config {
            image_path,
            image_size,
            depths,
            format,
            swap_endian: swap,
            halt_on_wait,
        }))
    }

    /// Reads and decodes the boot image file.
    pub async fn load_boot_image(&self) -> Result<Vec<Cell>, VMError> {
        let bytes = tokio::fs::read(&self.image_path).await?;
        let mut cells = match self.format {
            ImageFormat::Binary => decode_cells(&bytes, Endian::Little)?,
            ImageFormat::Text => {
                let text = String::from_utf8(bytes).map_err(|e| VMError::MalformedImage {
                    reason: format!("not valid UTF-8: {}", e),
                })?;
                parse_cells(&text)?
            }
        };
        if self.swap_endian {
            swap_endian(&mut cells);
        }
        Ok(cells)
    }

    /// Loads the boot image into an image of the configured capacity.
    pub async fn load_image(&self) -> Result<Image, VMError> {
        let boot = self.load_boot_image().await?;
        Image::load(&boot, self.image_size)
    }
}

fn required(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue {
        flag: flag.to_string(),
    })
}

fn invalid(flag: &str, value: String) -> ConfigError {
    ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    }
}

fn parse_count(flag: &str, value: Option<String>) -> Result<usize, ConfigError> {
    let value = required(flag, value)?;
    value.parse().map_err(|_| invalid(flag, value))
}

fn parse_depth(flag: &str, value: Option<String>) -> Result<usize, ConfigError> {
    let value = required(flag, value)?;
    match value.parse() {
        Ok(depth) if depth <= MAX_STACK_DEPTH => Ok(depth),
        _ => Err(invalid(flag, value)),
    }
}
