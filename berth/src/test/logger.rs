use log::*;

struct Logger {
    level: Level,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        use colored::Colorize;

        if !self.enabled(record.metadata()) {
            return;
        }
        let id = std::thread::current().id();
        let line = format!("{:?} {:<10} {}", id, format!("{}:", record.target()), record.args());

        match record.level() {
            Level::Warn => println!("{}", line.yellow()),
            Level::Error => println!("{}", line.red()),
            _ => println!("{}", line.dimmed()),
        }
    }

    fn flush(&self) {}
}

#[allow(dead_code)]
pub fn init(level: Level) {
    let logger = Logger { level };

    log::set_boxed_logger(Box::new(logger)).ok();
    log::set_max_level(level.to_level_filter());
}
