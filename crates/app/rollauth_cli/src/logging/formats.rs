use flexi_logger::DeferredNow;
use log::{Level, Record};

/// `LEVEL message`, with the target appended for debug and trace lines.
pub fn cli_format(
    w: &mut dyn std::io::Write,
    _now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    match record.level() {
        Level::Error | Level::Warn | Level::Info => {
            write!(w, "{:<5} {}", record.level(), record.args())
        }
        Level::Debug | Level::Trace => write!(
            w,
            "{:<5} {} [{}]",
            record.level(),
            record.args(),
            record.target()
        ),
    }
}
