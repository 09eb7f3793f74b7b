mod clean;
mod init;
mod run;
mod uninstall;

pub use clean::cmd_clean;
pub use init::cmd_init;
pub use run::cmd_run;
pub use uninstall::cmd_uninstall;
