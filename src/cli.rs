use crate::{
    ensure_output_dir, resolve_output_path, CaptureDriver, CaptureError, CaptureFormat,
    CaptureRequest, ChromiumLauncher, Config, Launcher, Viewport,
};
use chrono::{DateTime, Utc};
use clap::{ArgAction, CommandFactory, Parser};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Flags that consume the following token as their value.
const VALUE_FLAGS: &[&str] = &[
    "--url",
    "--format",
    "--output",
    "--delay",
    "--timeout",
    "--width",
    "--height",
    "--config",
];

const SWITCHES: &[&str] = &["--help", "-h", "--no-auto-scroll", "--verbose"];

/// Smallest accepted viewport edge in pixels.
pub const MIN_VIEWPORT: u32 = 320;

/// Largest viewport edge DevTools accepts for device metrics.
pub const MAX_VIEWPORT: u32 = 10_000_000;

/// Longest accepted `--delay` or `--timeout`, in seconds (one year).
pub const MAX_WAIT_SECS: u64 = 31_536_000;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "capture-page")]
#[command(about = "Capture a rendered web page as a full-page PNG or a PDF")]
#[command(override_usage = "capture-page --url <https://example.com> [--format png|pdf] [--output <path>]")]
#[command(disable_help_flag = true, args_override_self = true)]
pub struct Cli {
    #[arg(long, help = "URL to capture (required)")]
    pub url: Option<String>,

    #[arg(long, default_value = "png", help = "png or pdf")]
    pub format: String,

    #[arg(long, help = "Output file path")]
    pub output: Option<PathBuf>,

    #[arg(long, default_value = "2", help = "Seconds to wait after load")]
    pub delay: String,

    #[arg(long, default_value = "60", help = "Navigation timeout in seconds")]
    pub timeout: String,

    #[arg(long, default_value = "1440", help = "Viewport width for capture")]
    pub width: String,

    #[arg(long, default_value = "2200", help = "Viewport height for capture")]
    pub height: String,

    #[arg(long = "no-auto-scroll", action = ArgAction::SetFalse, help = "Disable auto-scroll before capture")]
    pub auto_scroll: bool,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short = 'h', long, action = ArgAction::SetTrue, help = "Show help")]
    pub help: bool,
}

impl Cli {
    /// Parses `args` (without the program name), ignoring unknown flags and value flags
    /// that have no usable value.
    pub fn parse_lenient<I, S>(args: I) -> Result<Self, CaptureError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = std::iter::once("capture-page".to_string()).chain(retain_known_flags(args));
        Cli::try_parse_from(argv).map_err(|e| CaptureError::Validation(e.to_string()))
    }

    /// Validates the parsed flags into a [`CaptureRequest`].
    pub fn to_request(&self) -> Result<CaptureRequest, CaptureError> {
        let raw_url = self.url.as_deref().ok_or_else(|| {
            CaptureError::Validation("Missing required argument: --url".to_string())
        })?;
        let url = Url::parse(raw_url)
            .map_err(|_| CaptureError::Validation(format!("Invalid URL: {raw_url}")))?;

        let format: CaptureFormat = self.format.to_lowercase().parse()?;

        let delay = parse_number(&self.delay);
        if !delay.is_finite() || delay < 0.0 {
            return Err(validation("--delay must be a non-negative number"));
        }
        let delay = wait_duration("--delay", delay)?;

        let timeout = parse_number(&self.timeout);
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(validation("--timeout must be a positive number"));
        }
        let timeout = wait_duration("--timeout", timeout)?;

        let viewport = Viewport {
            width: viewport_edge("--width", &self.width)?,
            height: viewport_edge("--height", &self.height)?,
        };

        Ok(CaptureRequest {
            url,
            format,
            output: self.output.clone(),
            delay,
            timeout,
            viewport,
            auto_scroll: self.auto_scroll,
        })
    }
}

fn validation(message: &str) -> CaptureError {
    CaptureError::Validation(message.to_string())
}

fn wait_duration(flag: &str, seconds: f64) -> Result<Duration, CaptureError> {
    if seconds > MAX_WAIT_SECS as f64 {
        return Err(CaptureError::Validation(format!(
            "{flag} must be at most {MAX_WAIT_SECS}"
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn viewport_edge(flag: &str, raw: &str) -> Result<u32, CaptureError> {
    let value = parse_number(raw);
    if !value.is_finite() || value < f64::from(MIN_VIEWPORT) {
        return Err(CaptureError::Validation(format!(
            "{flag} must be at least {MIN_VIEWPORT}"
        )));
    }
    if value > f64::from(MAX_VIEWPORT) {
        return Err(CaptureError::Validation(format!(
            "{flag} must be at most {MAX_VIEWPORT}"
        )));
    }
    Ok(value.floor() as u32)
}

/// Keeps recognised switches and `flag=value` pairs, dropping everything else.
///
/// A value flag takes the next token verbatim, even one that looks like a flag. A value flag
/// that is last or followed by an empty token is dropped and its default stays in effect.
pub fn retain_known_flags<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tokens: Vec<String> = args.into_iter().map(Into::into).collect();
    let mut kept = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i].as_str();

        if VALUE_FLAGS.contains(&token) {
            match tokens.get(i + 1) {
                Some(value) if !value.is_empty() => {
                    kept.push(format!("{token}={value}"));
                    i += 2;
                    continue;
                }
                _ => debug!("Ignoring {} without a value", token),
            }
        } else if SWITCHES.contains(&token) {
            kept.push(token.to_string());
        } else {
            debug!("Ignoring unrecognised argument {:?}", token);
        }
        i += 1;
    }

    kept
}

/// Numeric coercion with ECMAScript `Number()` semantics.
///
/// Whitespace is trimmed and blank input is zero. `0x`, `0o` and `0b` integers are accepted.
/// Anything else that is not a decimal literal is NaN.
pub fn parse_number(raw: &str) -> f64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }

    let radix = match s.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &s[2..];
        if digits.is_empty() {
            return f64::NAN;
        }
        return digits
            .chars()
            .try_fold(0.0_f64, |acc, c| {
                c.to_digit(radix)
                    .map(|d| acc * f64::from(radix) + f64::from(d))
            })
            .unwrap_or(f64::NAN);
    }

    match s.trim_start_matches(['+', '-']) {
        "Infinity" => {
            if s.starts_with('-') {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            }
        }
        // Rust accepts `inf` and `nan` spellings that Number() does not
        rest if rest.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => {
            f64::NAN
        }
        _ => s.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Prints the usage text on stdout.
pub fn print_usage() {
    println!("{}", Cli::command().render_help());
}

/// How an invocation ended without error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Help,
    Captured(PathBuf),
}

/// Executes validated capture requests against a loaded configuration.
pub struct CliRunner {
    pub config: Config,
    cwd: PathBuf,
}

impl CliRunner {
    /// Loads the configuration named by `--config` and captures the working directory.
    pub async fn new(cli: &Cli) -> Result<Self, CaptureError> {
        let config = Config::load(cli.config.as_deref()).await?;
        let cwd = std::env::current_dir().map_err(|e| {
            CaptureError::Filesystem(format!("cannot read working directory: {e}"))
        })?;
        Ok(Self::with_config(config, cwd))
    }

    pub fn with_config(config: Config, cwd: PathBuf) -> Self {
        Self { config, cwd }
    }

    /// Resolves the destination, creates its directory and runs the capture. Returns the
    /// absolute path written.
    pub async fn capture(
        &self,
        request: &CaptureRequest,
        launcher: &dyn Launcher,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, CaptureError> {
        let output = resolve_output_path(request, &self.config.capture_dir, &self.cwd, now);
        ensure_output_dir(&output).await?;

        info!(
            "Capturing {} as {} to {}",
            request.url,
            request.format.extension(),
            output.display()
        );

        CaptureDriver::new(self.config.clone())
            .run(launcher, request, &output)
            .await?;
        Ok(output)
    }
}

/// Runs one invocation from its raw arguments (program name excluded).
pub async fn run<I, S>(args: I) -> Result<Outcome, CaptureError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cli = Cli::parse_lenient(args)?;
    setup_logging(cli.verbose);

    if cli.help {
        print_usage();
        return Ok(Outcome::Help);
    }
    if cli.url.is_none() {
        print_usage();
    }

    let request = cli.to_request()?;
    let runner = CliRunner::new(&cli).await?;
    let launcher = ChromiumLauncher::new(runner.config.clone(), &request);

    let output = runner.capture(&request, &launcher, Utc::now()).await?;
    Ok(Outcome::Captured(output))
}

/// Installs the stderr `tracing` subscriber. WARN by default, DEBUG when `verbose`.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    // Already installed when embedded or under test
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_request(args: &[&str]) -> Result<CaptureRequest, CaptureError> {
        Cli::parse_lenient(args.iter().copied())?.to_request()
    }

    fn message(args: &[&str]) -> String {
        parse_request(args).unwrap_err().to_string()
    }

    #[test]
    fn test_defaults() {
        let request = parse_request(&["--url", "https://example.com"]).unwrap();
        assert_eq!(request, CaptureRequest::new(Url::parse("https://example.com").unwrap()));
    }

    #[test]
    fn test_all_flags() {
        let request = parse_request(&[
            "--url",
            "https://example.com/a",
            "--format",
            "PDF",
            "--output",
            "out/a.pdf",
            "--delay",
            "0.5",
            "--timeout",
            "10",
            "--width",
            "800",
            "--height",
            "600",
            "--no-auto-scroll",
        ])
        .unwrap();

        assert_eq!(request.format, CaptureFormat::Pdf);
        assert_eq!(request.output, Some(PathBuf::from("out/a.pdf")));
        assert_eq!(request.delay, Duration::from_millis(500));
        assert_eq!(request.timeout, Duration::from_secs(10));
        assert_eq!(request.viewport, Viewport { width: 800, height: 600 });
        assert!(!request.auto_scroll);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let args = ["--url", "https://example.com", "--delay", "3", "--bogus"];
        let first = Cli::parse_lenient(args).unwrap();
        let second = Cli::parse_lenient(args).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_request().unwrap(), second.to_request().unwrap());
    }

    #[test]
    fn test_help_switches() {
        assert!(Cli::parse_lenient(["--help"]).unwrap().help);
        assert!(Cli::parse_lenient(["-h", "--url", "nonsense"]).unwrap().help);
        assert!(!Cli::parse_lenient(["--url", "https://example.com"]).unwrap().help);
    }

    #[test]
    fn test_value_flag_swallows_next_token() {
        let cli = Cli::parse_lenient(["--url", "--help"]).unwrap();
        assert!(!cli.help);
        assert_eq!(cli.url.as_deref(), Some("--help"));
        assert_eq!(cli.to_request().unwrap_err().to_string(), "Invalid URL: --help");
    }

    #[test]
    fn test_unknown_flags_are_ignored() {
        let request = parse_request(&[
            "--verbose-ish",
            "--url",
            "https://example.com",
            "stray",
            "--quality",
            "90",
        ])
        .unwrap();
        assert_eq!(request.url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_dangling_value_flag_keeps_default() {
        let request = parse_request(&["--url", "https://example.com", "--delay"]).unwrap();
        assert_eq!(request.delay, Duration::from_secs(2));

        let request = parse_request(&["--url", "https://example.com", "--width", ""]).unwrap();
        assert_eq!(request.viewport.width, 1440);
    }

    #[test]
    fn test_repeated_flag_keeps_last_value() {
        let request = parse_request(&["--url", "https://a.test", "--url", "https://b.test"]).unwrap();
        assert_eq!(request.url.host_str(), Some("b.test"));
    }

    #[test]
    fn test_missing_url() {
        assert_eq!(message(&[]), "Missing required argument: --url");
        assert_eq!(message(&["--url"]), "Missing required argument: --url");
    }

    #[test]
    fn test_invalid_url() {
        assert_eq!(message(&["--url", "not-a-url"]), "Invalid URL: not-a-url");
    }

    #[test]
    fn test_format_validation() {
        assert_eq!(
            message(&["--url", "https://example.com", "--format", "gif"]),
            "--format must be one of: png, pdf"
        );
        let request = parse_request(&["--url", "https://example.com", "--format", "Png"]).unwrap();
        assert_eq!(request.format, CaptureFormat::Png);
    }

    #[test]
    fn test_delay_bounds() {
        let request = parse_request(&["--url", "https://example.com", "--delay", "0"]).unwrap();
        assert_eq!(request.delay, Duration::ZERO);

        for bad in ["-1", "abc", "Infinity", "1e400", "-0x1"] {
            assert_eq!(
                message(&["--url", "https://example.com", "--delay", bad]),
                "--delay must be a non-negative number",
                "delay {bad}"
            );
        }
    }

    #[test]
    fn test_timeout_bounds() {
        for bad in ["0", "-5", "NaN", "soon"] {
            assert_eq!(
                message(&["--url", "https://example.com", "--timeout", bad]),
                "--timeout must be a positive number",
                "timeout {bad}"
            );
        }
        let request = parse_request(&["--url", "https://example.com", "--timeout", "0.25"]).unwrap();
        assert_eq!(request.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_wait_upper_bounds() {
        let request = parse_request(&["--url", "https://example.com", "--timeout", "31536000"])
            .unwrap();
        assert_eq!(request.timeout, Duration::from_secs(MAX_WAIT_SECS));

        for huge in ["31536001", "1e19", "9.3e18"] {
            assert_eq!(
                message(&["--url", "https://example.com", "--timeout", huge]),
                "--timeout must be at most 31536000",
                "timeout {huge}"
            );
        }
        assert_eq!(
            message(&["--url", "https://example.com", "--delay", "1e12"]),
            "--delay must be at most 31536000"
        );
    }

    #[test]
    fn test_viewport_boundaries() {
        let request = parse_request(&[
            "--url",
            "https://example.com",
            "--width",
            "320",
            "--height",
            "320",
        ])
        .unwrap();
        assert_eq!(request.viewport, Viewport { width: 320, height: 320 });

        assert_eq!(
            message(&["--url", "https://example.com", "--width", "319"]),
            "--width must be at least 320"
        );
        assert_eq!(
            message(&["--url", "https://example.com", "--height", "319.9"]),
            "--height must be at least 320"
        );
        assert_eq!(
            message(&["--url", "https://example.com", "--width", "1e9"]),
            "--width must be at most 10000000"
        );
    }

    #[test]
    fn test_fractional_viewport_is_floored() {
        let request = parse_request(&["--url", "https://example.com", "--width", "1024.9"]).unwrap();
        assert_eq!(request.viewport.width, 1024);
    }

    #[test]
    fn test_validation_order() {
        assert_eq!(
            message(&["--url", "nope", "--format", "gif", "--delay", "-1"]),
            "Invalid URL: nope"
        );
        assert_eq!(
            message(&["--url", "https://example.com", "--format", "gif", "--delay", "-1"]),
            "--format must be one of: png, pdf"
        );
        assert_eq!(
            message(&[
                "--url",
                "https://example.com",
                "--timeout",
                "0",
                "--width",
                "10"
            ]),
            "--timeout must be a positive number"
        );
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), 42.0);
        assert_eq!(parse_number("  1.5 "), 1.5);
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("   "), 0.0);
        assert_eq!(parse_number("0x10"), 16.0);
        assert_eq!(parse_number("0b101"), 5.0);
        assert_eq!(parse_number("0o17"), 15.0);
        assert_eq!(parse_number("1e3"), 1000.0);
        assert_eq!(parse_number("+7"), 7.0);
        assert_eq!(parse_number(".5"), 0.5);
        assert_eq!(parse_number("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_number("0x").is_nan());
        assert!(parse_number("0xZZ").is_nan());
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("nan").is_nan());
        assert!(parse_number("12px").is_nan());
        assert!(parse_number("1_000").is_nan());
    }

    #[test]
    fn test_retain_known_flags() {
        let kept = retain_known_flags([
            "--url",
            "https://example.com",
            "--foo",
            "--no-auto-scroll",
            "--height",
        ]);
        assert_eq!(kept, vec!["--url=https://example.com", "--no-auto-scroll"]);
    }

    #[test]
    fn test_usage_mentions_every_flag() {
        let help = Cli::command().render_help().to_string();
        for flag in [
            "--url",
            "--format",
            "--output",
            "--delay",
            "--timeout",
            "--width",
            "--height",
            "--no-auto-scroll",
            "--help",
        ] {
            assert!(help.contains(flag), "usage is missing {flag}");
        }
    }
}
