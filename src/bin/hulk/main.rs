use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod cmd_config;
mod cmd_dump;
mod cmd_files;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт: info.
    // Пример: RUST_LOG=debug ./hulk dump --file ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Config { json } => cmd_config::exec(json),

        cli::Cmd::Files { dir, activity, prefix } => cmd_files::exec(dir, activity, prefix),

        cli::Cmd::Dump { file, framed, json } => cmd_dump::exec(file, framed, json),
    }
}
