//! NativeIO CLI
//!
//! Inspects and edits a namespace directory from the command line.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use nativeio::{Config, Namespace, Primitives, RecoveryScanner, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// NativeIO CLI
#[derive(Parser, Debug)]
#[command(name = "nativeio")]
#[command(about = "Crash-consistent sandboxed file store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./nativeio_data")]
    data_dir: PathBuf,

    /// Namespace capacity in MB
    #[arg(short, long, default_value = "256")]
    capacity: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the open/write/read/close/delete walkthrough
    Demo,

    /// List files with their lengths
    Ls,

    /// Print a file's contents
    Cat {
        name: String,

        /// Byte offset to start at
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Maximum bytes to print (default: to end of file)
        #[arg(short, long)]
        length: Option<usize>,
    },

    /// Write a string into a file (created if absent)
    Write {
        name: String,

        data: String,

        /// Byte offset to write at
        #[arg(short, long, default_value = "0")]
        offset: u64,
    },

    /// Truncate or zero-extend a file
    Truncate {
        name: String,

        length: u64,
    },

    /// Delete a file
    Rm {
        name: String,
    },

    /// Show a file's metadata and allocated ranges
    Stat {
        name: String,
    },

    /// Rewrite the block log keeping only live blocks
    Compact,

    /// Check the block log without opening the namespace
    Verify,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nativeio=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("NativeIO v{}, data directory {}", nativeio::VERSION, args.data_dir.display());

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if let Commands::Verify = args.command {
        let report = RecoveryScanner::verify(&args.data_dir.join(Namespace::LOG_FILENAME))?;
        println!("frames scanned:    {}", report.frames_scanned);
        println!("frames corrupted:  {}", report.frames_corrupted);
        println!("writes committed:  {}", report.writes_committed);
        println!("writes discarded:  {}", report.writes_discarded);
        println!("files:             {}", report.files_recovered);
        println!("last lsn:          {}", report.last_lsn);
        println!("torn tail:         {}", report.was_truncated);
        return Ok(());
    }

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .capacity_mib(args.capacity)?
        .build();
    let namespace = Arc::new(Namespace::open(config)?);

    match args.command {
        Commands::Demo => demo(&Primitives::new(Arc::clone(&namespace))),
        Commands::Ls => {
            for name in namespace.get_all() {
                let info = namespace.stat(&name)?;
                println!("{:>12}  {}", info.length, info.name);
            }
        }
        Commands::Cat {
            name,
            offset,
            length,
        } => {
            namespace.stat(&name)?;
            let fd = namespace.open_file(&name)?;
            let length = match length {
                Some(length) => length,
                None => namespace.get_length(fd)?.saturating_sub(offset) as usize,
            };
            let data = namespace.read(fd, length, offset);
            namespace.close(fd)?;
            io::stdout().write_all(&data?)?;
        }
        Commands::Write { name, data, offset } => {
            let fd = namespace.open_file(&name)?;
            let written = namespace.write(fd, data.as_bytes(), offset);
            namespace.close(fd)?;
            println!("wrote {} bytes", written?);
        }
        Commands::Truncate { name, length } => {
            let fd = namespace.open_file(&name)?;
            let resized = namespace.set_length(fd, length);
            namespace.close(fd)?;
            resized?;
        }
        Commands::Rm { name } => namespace.delete(&name)?,
        Commands::Stat { name } => {
            let info = namespace.stat(&name)?;
            println!("name:          {}", info.name);
            println!("id:            {}", info.id);
            println!("length:        {}", info.length);
            println!("sequence:      {}", info.seq);
            println!("open handles:  {}", info.open_handles);
            for range in info.allocated {
                println!("allocated:     {}..{}", range.start, range.end);
            }
        }
        Commands::Compact => {
            let before = namespace.log_size();
            namespace.compact()?;
            println!("log {} -> {} bytes", before, namespace.log_size());
        }
        Commands::Verify => {}
    }

    match Arc::try_unwrap(namespace) {
        Ok(namespace) => namespace.shutdown(),
        Err(_) => Ok(()),
    }
}

/// The reference walkthrough, through the integer surface
fn demo(io: &Primitives) {
    let fd = io.open("f");
    println!("open(\"f\")                  = {}", fd);
    println!("write(fd, [1; 10], 4)      = {}", io.write(fd, &[1u8; 10], 4));

    let mut buf = [0u8; 6];
    let read = io.read(fd, &mut buf, 0);
    println!("read(fd, 6, 0)             = {} {:?}", read, &buf[..read.max(0) as usize]);
    println!("close(fd)                  = {}", io.close(fd));
    println!("get_all()                  = {:?}", io.get_all());
    println!("delete(\"f\")                = {}", io.delete("f"));
    println!("get_all()                  = {:?}", io.get_all());
}
