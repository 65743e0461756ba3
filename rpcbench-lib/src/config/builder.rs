use std::{ffi::OsString, marker::PhantomData, time::Duration};

use clap::{Arg, ArgAction, ArgMatches, Command};
use rama::error::{BoxError, ErrorContext as _, OpaqueError};

/// Value kind of a scenario parameter, used for parsing and usage text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Int,
    Bytes,
    Seconds,
    File,
    Flag,
}

impl ParamType {
    pub fn value_name(self) -> &'static str {
        match self {
            Self::Str => "STR",
            Self::Int => "INT",
            Self::Bytes => "BYTES",
            Self::Seconds => "SECONDS",
            Self::File => "FILE",
            Self::Flag => "BOOL",
        }
    }
}

/// A named, typed scenario parameter.
pub trait Param: Copy + Eq + std::fmt::Debug + 'static {
    /// Every parameter, in usage order.
    fn all() -> &'static [Self];

    fn name(&self) -> &'static str;
    fn value_type(&self) -> ParamType;
    fn description(&self) -> &'static str;

    fn default_value(&self) -> Option<&'static str> {
        None
    }

    fn is_required(&self) -> bool {
        false
    }
}

/// A configuration assembled from parameter values.
pub trait Configuration: Default {
    type Param: Param;

    fn set_value(&mut self, param: Self::Param, value: &str) -> Result<(), BoxError>;

    /// Cross parameter checks, run once every value is set.
    fn validate(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Builds a [`Configuration`] from command line arguments.
///
/// A builder may expose only a subset of the parameters. Parameters that
/// are not exposed keep their default value.
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder<C: Configuration> {
    supported: Vec<C::Param>,
    _config: PhantomData<fn() -> C>,
}

impl<C: Configuration> Default for ConfigurationBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Configuration> ConfigurationBuilder<C> {
    /// Expose every parameter.
    pub fn new() -> Self {
        Self {
            supported: C::Param::all().to_vec(),
            _config: PhantomData,
        }
    }

    /// Expose only the given parameters.
    pub fn with_supported(params: &[C::Param]) -> Self {
        let supported = C::Param::all()
            .iter()
            .copied()
            .filter(|p| params.contains(p))
            .collect();
        Self {
            supported,
            _config: PhantomData,
        }
    }

    pub fn supported(&self) -> &[C::Param] {
        &self.supported
    }

    /// Render the exposed parameters as a [`Command`].
    ///
    /// Values are kept as strings; typing happens in
    /// [`Configuration::set_value`] so that errors carry the parameter name.
    pub fn command(&self, name: &'static str) -> Command {
        self.supported
            .iter()
            .fold(Command::new(name), |cmd, param| cmd.arg(to_arg(*param)))
    }

    pub fn usage(&self, name: &'static str) -> String {
        self.command(name).render_help().to_string()
    }

    pub fn build_from_matches(&self, matches: &ArgMatches) -> Result<C, BoxError> {
        let mut config = C::default();

        for param in C::Param::all() {
            let value = if self.supported.contains(param) {
                matches
                    .get_one::<String>(param.name())
                    .map(String::as_str)
                    .or_else(|| param.default_value())
            } else {
                param.default_value()
            };

            match value {
                Some(value) => config
                    .set_value(*param, value)
                    .context("invalid parameter value")
                    .context_str_field("param", param.name())
                    .context_str_field("value", value)?,
                None if param.is_required() && self.supported.contains(param) => {
                    return Err(OpaqueError::from_display(format!(
                        "missing required parameter: --{}",
                        param.name()
                    ))
                    .into());
                }
                None => (),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse the given arguments, the first one being the program name.
    pub fn build<I, T>(&self, name: &'static str, args: I) -> Result<C, BoxError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.command(name).try_get_matches_from(args)?;
        self.build_from_matches(&matches)
    }
}

fn to_arg<P: Param>(param: P) -> Arg {
    let mut help = param.description().to_owned();
    if let Some(default) = param.default_value() {
        help.push_str(&format!(" [default: {default}]"));
    }

    let arg = Arg::new(param.name())
        .long(param.name())
        .help(help)
        .value_name(param.value_type().value_name())
        .action(ArgAction::Set);

    match param.value_type() {
        ParamType::Flag => arg.num_args(0..=1).default_missing_value("true"),
        _ => arg.num_args(1),
    }
}

pub fn parse_int(value: &str) -> Result<i64, BoxError> {
    value.trim().parse::<i64>().context("parse integer")
}

/// Non negative integer, used for counts.
pub fn parse_count(value: &str) -> Result<usize, BoxError> {
    value.trim().parse::<usize>().context("parse non-negative integer")
}

/// Byte size: a plain integer with an optional `k`/`m` binary suffix.
pub fn parse_bytes(value: &str) -> Result<usize, BoxError> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last() {
        Some((idx, 'k' | 'K')) => (&value[..idx], 1024),
        Some((idx, 'm' | 'M')) => (&value[..idx], 1024 * 1024),
        _ => (value, 1),
    };
    let n = digits.parse::<usize>().context("parse byte size")?;
    n.checked_mul(multiplier)
        .ok_or_else(|| OpaqueError::from_display("byte size overflows").into())
}

/// Whole seconds, or a human readable duration such as `1m 30s`.
pub fn parse_seconds(value: &str) -> Result<Duration, BoxError> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).context("parse duration")
}

pub fn parse_flag(value: &str) -> Result<bool, BoxError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(OpaqueError::from_display(format!("invalid boolean: {other}")).into()),
    }
}
