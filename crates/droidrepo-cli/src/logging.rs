use std::fmt::{Debug, Write as _};

use nu_ansi_term::Color::{Blue, DarkGray, Magenta, Red, Yellow};
use tracing::{
    field::{Field, Visit},
    Event, Level, Metadata, Subscriber,
};
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields, MakeWriter,
    },
    registry::LookupSpan,
    EnvFilter,
};

use crate::{cli::Args, utils::Colored};

/// Overrides the verbosity flags with a full filter directive.
const LOG_ENV: &str = "DROIDREPO_LOG";

/// The message of an event and its structured fields, such as `repo_id`, in recording order.
#[derive(Default)]
struct EventFields {
    message: Option<String>,
    fields: String,
}

impl EventFields {
    fn push(&mut self, name: &str, value: impl std::fmt::Display) {
        if name == "message" {
            self.message = Some(value.to_string());
        } else {
            let _ = write!(self.fields, " {name}={value}");
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field.name(), value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.push(field.name(), format_args!("{value:?}"));
    }
}

/// Terminal output: the message, a level tag unless the event is plain info, and the
/// structured fields dimmed at the end of the line.
struct TerminalFormat;

impl<S, N> FormatEvent<S, N> for TerminalFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut recorded = EventFields::default();
        event.record(&mut recorded);

        let tag = match *event.metadata().level() {
            Level::TRACE => Some(Colored(Magenta, "trace")),
            Level::DEBUG => Some(Colored(Blue, "debug")),
            Level::INFO => None,
            Level::WARN => Some(Colored(Yellow, "warning")),
            Level::ERROR => Some(Colored(Red, "error")),
        };
        if let Some(tag) = tag {
            write!(writer, "{tag}: ")?;
        }
        write!(writer, "{}", recorded.message.as_deref().unwrap_or_default())?;
        if !recorded.fields.is_empty() {
            write!(writer, " {}", Colored(DarkGray, recorded.fields.trim_start()))?;
        }
        writeln!(writer)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Plain info lines are command output; everything else is diagnostics.
    fn for_level(level: &Level) -> Self {
        if *level == Level::INFO {
            Stream::Stdout
        } else {
            Stream::Stderr
        }
    }
}

/// Collects one formatted event and prints it on drop, hiding the progress bars meanwhile.
struct PendingLine {
    buffer: Vec<u8>,
    stream: Stream,
}

impl std::io::Write for PendingLine {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for PendingLine {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let line = String::from_utf8_lossy(&self.buffer);
        let line = line.trim_end_matches('\n');
        crate::progress::suspend(|| {
            match self.stream {
                Stream::Stdout => println!("{line}"),
                Stream::Stderr => eprintln!("{line}"),
            }
        });
    }
}

/// Hands out a [`PendingLine`] per event so log output never tears a progress bar.
struct ProgressAwareWriter;

impl<'a> MakeWriter<'a> for ProgressAwareWriter {
    type Writer = PendingLine;

    fn make_writer(&'a self) -> Self::Writer {
        PendingLine {
            buffer: Vec::new(),
            stream: Stream::Stdout,
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        PendingLine {
            buffer: Vec::new(),
            stream: Stream::for_level(meta.level()),
        }
    }
}

/// Maps `--quiet` and the number of `-v` flags to the most verbose level shown.
pub fn verbosity_level(quiet: bool, verbose: u8) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn env_filter(args: &Args) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        let level = verbosity_level(args.quiet, args.verbose);
        // every workspace crate target starts with this prefix
        EnvFilter::new(format!("droidrepo={level}"))
    })
}

pub fn setup_logging(args: &Args) {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter(args))
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(ProgressAwareWriter)
        .without_time();

    let subscriber: Box<dyn Subscriber + Send + Sync> = if args.json {
        Box::new(builder.json().flatten_event(true).finish())
    } else {
        Box::new(builder.event_format(TerminalFormat).finish())
    };

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("A tracing subscriber was already installed");
    }
}
