//! Logging setup.
//!
//! Builds a `tracing` dispatcher from [`LoggingConfig`]: a console and an
//! optional file destination, each rendered either as JSON or through a
//! display template. Templates recognise `%level`, `%message`,
//! `%timestamp`, `%host` and `%pid`; anything else is copied verbatim.
//!
//! The dispatcher is owned by a [`Logging`] handle. The binary installs it
//! process-wide at startup and drops it at exit, which flushes the file;
//! tests scope it with `tracing::dispatcher::with_default` instead.

use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to rotate log file '{}': {source}", path.display())]
    Rotate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to open log file '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("A global logger is already installed")]
    AlreadyInstalled(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

/// How a destination renders events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Template(Template),
}

impl LogFormat {
    /// `"json"` selects JSON output, any other string is a template.
    pub fn parse(format: &str) -> Self {
        if format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Template(Template::parse(format))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Level,
    Message,
    Timestamp,
    Host,
    Pid,
}

const PLACEHOLDERS: &[(&str, Segment)] = &[
    ("%level", Segment::Level),
    ("%message", Segment::Message),
    ("%timestamp", Segment::Timestamp),
    ("%host", Segment::Host),
    ("%pid", Segment::Pid),
];

/// A parsed display template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while !rest.is_empty() {
            let placeholder = PLACEHOLDERS
                .iter()
                .find(|(name, _)| rest.starts_with(name));

            match placeholder {
                Some((name, segment)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment.clone());
                    rest = &rest[name.len()..];
                }
                None => {
                    let mut chars = rest.chars();
                    if let Some(c) = chars.next() {
                        literal.push(c);
                    }
                    rest = chars.as_str();
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }
}

/// Renders events through a [`Template`].
pub struct TemplateFormat {
    template: Template,
    colorize: bool,
    host: String,
    pid: u32,
}

impl TemplateFormat {
    pub fn new(template: Template, colorize: bool) -> Self {
        Self {
            template,
            colorize,
            host: hostname(),
            pid: std::process::id(),
        }
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[31m",
        Level::WARN => "\x1b[33m",
        Level::INFO => "\x1b[32m",
        Level::DEBUG => "\x1b[34m",
        Level::TRACE => "\x1b[35m",
    }
}

impl<S, N> FormatEvent<S, N> for TemplateFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = event.metadata().level();

        for segment in &self.template.segments {
            match segment {
                Segment::Literal(text) => writer.write_str(text)?,
                Segment::Level if self.colorize => {
                    write!(writer, "{}{}\x1b[0m", level_color(level), level_name(level))?
                }
                Segment::Level => writer.write_str(level_name(level))?,
                Segment::Message => {
                    if let Some(scope) = ctx.event_scope() {
                        for span in scope.from_root() {
                            writer.write_str(span.name())?;
                            let extensions = span.extensions();
                            if let Some(fields) = extensions.get::<FormattedFields<N>>() {
                                if !fields.is_empty() {
                                    write!(writer, "{{{fields}}}")?;
                                }
                            }
                            writer.write_str(": ")?;
                        }
                    }
                    ctx.field_format().format_fields(writer.by_ref(), event)?;
                }
                Segment::Timestamp => writer
                    .write_str(&Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))?,
                Segment::Host => writer.write_str(&self.host)?,
                Segment::Pid => write!(writer, "{}", self.pid)?,
            }
        }
        writeln!(writer)
    }
}

/// Host name of this machine, `localhost` if it cannot be read.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the pointer and length describe `buf`, which outlives the call
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Move an existing `name.ext` aside to `name1.ext` so the log file only
/// holds output from this process.
pub fn rotate_existing(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rotated_name = match path.extension() {
        Some(ext) => format!("{stem}1.{}", ext.to_string_lossy()),
        None => format!("{stem}1"),
    };
    let rotated = path.with_file_name(rotated_name);
    std::fs::rename(path, &rotated)?;
    Ok(Some(rotated))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(format: &LogFormat, colorize: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Template(template) => tracing_subscriber::fmt::layer()
            .event_format(TemplateFormat::new(template.clone(), colorize))
            .with_ansi(colorize)
            .with_writer(writer)
            .boxed(),
    }
}

/// Owns the process's logging dispatcher and any open log file.
pub struct Logging {
    dispatch: Dispatch,
    file: Option<Arc<File>>,
}

impl Logging {
    /// Build the dispatcher described by `config`.
    ///
    /// `RUST_LOG` takes precedence over `config.level`.
    pub fn build(config: &LoggingConfig) -> Result<Self, LoggingError> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if config.console.enabled {
            layers.push(fmt_layer(
                &LogFormat::parse(&config.console.format),
                config.console.colorize,
                io::stdout,
            ));
        }

        let mut file = None;
        if let Some(transport) = &config.file {
            rotate_existing(&transport.path).map_err(|source| LoggingError::Rotate {
                path: transport.path.clone(),
                source,
            })?;
            let opened = File::create(&transport.path).map_err(|source| LoggingError::Open {
                path: transport.path.clone(),
                source,
            })?;
            let opened = Arc::new(opened);
            layers.push(fmt_layer(
                &LogFormat::parse(&transport.format),
                transport.colorize,
                Arc::clone(&opened),
            ));
            file = Some(opened);
        }

        let subscriber = Registry::default().with(layers).with(filter);
        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            file,
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Make this the process-wide dispatcher. Can only succeed once.
    pub fn install(&self) -> Result<(), LoggingError> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())?;
        Ok(())
    }

    /// Push file output to disk.
    pub fn flush(&self) -> io::Result<()> {
        if let Some(file) = &self.file {
            (&**file).flush()?;
            file.sync_data()?;
        }
        Ok(())
    }
}

impl Drop for Logging {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsoleTransport, FileTransport};
    use std::sync::Mutex;
    use tracing::info;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn render(template: &str, colorize: bool, log: impl FnOnce()) -> String {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(colorize)
            .event_format(TemplateFormat::new(Template::parse(template), colorize))
            .with_writer(captured.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, log);
        captured.contents()
    }

    #[test]
    fn test_template_parse() {
        let template = Template::parse("[%level] %message (%host/%pid) 100%");
        assert_eq!(
            template.segments,
            vec![
                Segment::Literal("[".to_string()),
                Segment::Level,
                Segment::Literal("] ".to_string()),
                Segment::Message,
                Segment::Literal(" (".to_string()),
                Segment::Host,
                Segment::Literal("/".to_string()),
                Segment::Pid,
                Segment::Literal(") 100%".to_string()),
            ]
        );
    }

    #[test]
    fn test_template_ignores_dollar_and_unknown() {
        let template = Template::parse("${info.level} %levels %user");
        assert_eq!(
            template.segments,
            vec![
                Segment::Literal("${info.level} ".to_string()),
                Segment::Level,
                Segment::Literal("s %user".to_string()),
            ]
        );
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert!(matches!(LogFormat::parse("%message"), LogFormat::Template(_)));
    }

    #[test]
    fn test_render_level_and_message() {
        let output = render("%level: %message", false, || info!(port = 2525, "Listener bound"));
        assert_eq!(output, "info: Listener bound port=2525\n");
    }

    #[test]
    fn test_render_span_scope() {
        let output = render("%message", false, || {
            let span = tracing::info_span!("listener", port = 80);
            let _entered = span.enter();
            tracing::warn!("closing");
        });
        assert_eq!(output, "listener{port=80}: closing\n");
    }

    #[test]
    fn test_render_host_pid_timestamp() {
        let output = render("%host %pid %timestamp", false, || info!("x"));
        let parts: Vec<&str> = output.trim_end().split(' ').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], hostname());
        assert_eq!(parts[1], std::process::id().to_string());
        assert!(chrono::DateTime::parse_from_rfc3339(parts[2]).is_ok());
    }

    #[test]
    fn test_render_colorized_level() {
        let output = render("%level", true, || tracing::error!("bad"));
        assert_eq!(output, "\x1b[31merror\x1b[0m\n");
    }

    #[test]
    fn test_rotate_existing() {
        let dir = std::env::temp_dir().join(format!("byte-relay-rotate-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relay.log");

        assert_eq!(rotate_existing(&path).unwrap(), None);

        std::fs::write(&path, "old run\n").unwrap();
        let rotated = rotate_existing(&path).unwrap().unwrap();
        assert_eq!(rotated, dir.join("relay1.log"));
        assert!(!path.exists());
        assert_eq!(std::fs::read_to_string(&rotated).unwrap(), "old run\n");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_transport() {
        let dir = std::env::temp_dir().join(format!("byte-relay-logfile-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relay.log");
        std::fs::write(&path, "previous\n").unwrap();

        let config = LoggingConfig {
            level: "info".to_string(),
            console: ConsoleTransport {
                enabled: false,
                ..ConsoleTransport::default()
            },
            file: Some(FileTransport {
                path: path.clone(),
                format: "%level %message".to_string(),
                colorize: false,
            }),
        };

        let logging = Logging::build(&config).unwrap();
        tracing::dispatcher::with_default(logging.dispatch(), || {
            tracing::warn!("written to file");
        });
        logging.flush().unwrap();
        drop(logging);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "warn written to file\n");
        assert_eq!(
            std::fs::read_to_string(dir.join("relay1.log")).unwrap(),
            "previous\n"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_transport_fields_are_plain() {
        let dir = std::env::temp_dir().join(format!("byte-relay-logfields-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fields.log");

        let config = LoggingConfig {
            level: "info".to_string(),
            console: ConsoleTransport {
                enabled: false,
                ..ConsoleTransport::default()
            },
            file: Some(FileTransport {
                path: path.clone(),
                format: "%level %message".to_string(),
                colorize: false,
            }),
        };

        let logging = Logging::build(&config).unwrap();
        tracing::dispatcher::with_default(logging.dispatch(), || {
            info!(port = 2525, "Listener bound");
        });
        logging.flush().unwrap();
        drop(logging);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains('\x1b'));
        assert_eq!(contents, "info Listener bound port=2525\n");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
