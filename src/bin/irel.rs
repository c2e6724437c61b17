use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use image_relocation::{
    digest::Digest,
    layout::{disk::OciLayoutPath, Layout},
    name::Name,
    registry::{ClientOptions, RemoteClient},
};

/// irel
#[derive(Debug, Parser)]
#[clap(name = "irel", version)]
pub struct App {
    /// the OCI image layout directory
    #[clap(long)]
    layout: PathBuf,
    /// use plain HTTP to talk to registries
    #[clap(long)]
    insecure: bool,
    #[clap(long, env = "REGISTRY_USERNAME")]
    username: Option<String>,
    #[clap(long, env = "REGISTRY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists the entries of the layout's index
    Ls,
    /// Prints the digest recorded for an image name
    Find {
        /// the image name, as given in the org.opencontainers.image.ref.name annotation
        name: Name,
    },
    /// Pushes the image manifest or index with the given digest to a registry
    Push { digest: Digest, target: Name },
    /// Finds an image by name and pushes it to a registry
    Relocate { name: Name, target: Name },
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    let client = RemoteClient::new(&ClientOptions {
        insecure: args.insecure,
        username: args.username,
        password: args.password,
    })?;
    let layout = Layout::new(client, OciLayoutPath::new(&args.layout));

    match args.cmd {
        Command::Ls => {
            for entry in layout.list()? {
                println!(
                    "{} {} {}",
                    entry.digest,
                    entry.media_type,
                    entry.name.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Find { ref name } => {
            println!("{}", layout.find(name)?);
        }
        Command::Push {
            ref digest,
            ref target,
        } => {
            layout.push(digest, target)?;
            println!("{target}");
        }
        Command::Relocate {
            ref name,
            ref target,
        } => {
            let digest = layout.relocate(name, target)?;
            println!("{digest}");
        }
    }
    Ok(())
}
