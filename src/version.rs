/// Version reported by the watcher binary. `APP_VERSION` set at compile time takes
/// precedence over the package version.
pub const VERSION: &str = match option_env!("APP_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};
