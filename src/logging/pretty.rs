//! Colorful console output for local runs.
//!
//! ```text
//! 14:32:01.234 INFO  || xdr_archiver::backup: Exported recording [customer=4821 i_xdr=555]
//! ```

use nu_ansi_term::{Color, Style};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

pub struct PrettyConsoleLogFormat;

fn level_style(level: &Level) -> Style {
    match *level {
        Level::TRACE => Style::new().fg(Color::Purple),
        Level::DEBUG => Style::new().fg(Color::Blue),
        Level::INFO => Style::new().fg(Color::Green),
        Level::WARN => Style::new().fg(Color::Yellow),
        Level::ERROR => Style::new().fg(Color::Red),
    }
}

impl<S, N> FormatEvent<S, N> for PrettyConsoleLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let dimmed = Style::new().dimmed();
        let nesting = Style::new().fg(Color::Magenta);

        write!(
            writer,
            "{} ",
            dimmed.paint(chrono::offset::Local::now().format("%T%.3f").to_string())
        )?;
        write!(
            writer,
            "{}",
            level_style(metadata.level()).paint(format!("{:<5}", metadata.level()))
        )?;

        let mut span_fields = Vec::new();
        if let Some(scope) = ctx.event_scope() {
            let mut depth = 0;
            for span in scope.from_root() {
                depth += 1;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>()
                    && !fields.is_empty()
                {
                    span_fields.push(fields.to_string());
                }
            }
            write!(writer, " {}", nesting.paint("|".repeat(depth)))?;
        }

        write!(writer, " {}", dimmed.paint(format!("{}:", metadata.target())))?;
        write!(writer, " ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        if !span_fields.is_empty() {
            write!(
                writer,
                " {}",
                nesting.paint(format!("[{}]", span_fields.join(" ")))
            )?;
        }

        writeln!(writer)
    }
}
