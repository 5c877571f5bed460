use log::{LevelFilter, SetLoggerError};
use log4rs::{
    Config,
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};

/// Install a console logger on stderr at the given level.
///
/// Panics are routed through the logger as well, so a failure inside the numerical backend
/// is reported with the same format as the rest of the export log.
pub fn init_log(level: LevelFilter) -> Result<(), SetLoggerError> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{h({l})} - {f}:{L}] {m}{n}")))
        .build();
    let appender = Appender::builder().build("stderr", Box::new(stderr));

    let config = match Config::builder()
        .appender(appender)
        .build(Root::builder().appender("stderr").build(level))
    {
        Ok(config) => config,
        // The configuration above only references the appender it declares.
        Err(errors) => unreachable!("invalid logger configuration: {errors}"),
    };

    log4rs::init_config(config)?;
    update_panic_hook();

    Ok(())
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        hook(info);
    }));
}
