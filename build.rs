//! Build script rendering the `relink(1)` manual page from the CLI definition.

use std::{fs, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

const MAN_DIR: &str = "target/generated-man";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-changed=build.rs");

    let cmd = cli::Cli::command();
    let page = PathBuf::from(MAN_DIR).join(format!("{}.1", cmd.get_name()));
    fs::create_dir_all(MAN_DIR)?;

    let mut rendered = Vec::new();
    Man::new(cmd).render(&mut rendered)?;
    fs::write(page, rendered)?;
    Ok(())
}
