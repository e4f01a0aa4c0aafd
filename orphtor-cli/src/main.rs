use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use orphtor_core::hasher::HashMode;
use orphtor_core::metainfo::{Metainfo, MetainfoOptions, Torrent};
use orphtor_core::path_safety::PathPolicy;
use orphtor_core::progress::{NoProgress, Progress};
use orphtor_core::summary::Summary;
use orphtor_core::walk::WalkOptions;
use orphtor_core::Generator;

#[derive(Parser)]
#[command(name = "orphtor", version, about = "Create torrents for release folders")]
struct Cli {
    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create a .torrent for each input folder
    Create {
        /// Piece size in bytes, a power of two (K/M suffix allowed). Auto-selected if unset.
        #[arg(long, value_parser = parse_size)]
        piece_size: Option<u64>,
        /// Tracker announce URL (repeatable)
        #[arg(long)]
        announce: Vec<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long, default_value_t = false)]
        private: bool,
        /// Source tag stored in the info dictionary
        #[arg(long)]
        source: Option<String>,
        /// Leave out the creation date so output is reproducible
        #[arg(long, default_value_t = false)]
        no_date: bool,
        /// Only include .flac, .mp3 and .m4a files
        #[arg(long, default_value_t = false)]
        media_only: bool,
        /// Hashing threads; 0 hashes on the calling thread
        #[arg(long, default_value_t = 0)]
        threads: usize,
        #[arg(long, default_value_t = false)]
        progress: bool,
        /// Print a JSON summary of each torrent
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Write torrents here instead of next to each input
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Check a folder against a torrent
    Verify {
        torrent: PathBuf,
        root: PathBuf,
        #[arg(long, default_value_t = false)]
        follow_symlinks: bool,
    },
    /// Describe a torrent
    Info {
        torrent: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

struct CreateOpts {
    piece_size: Option<u64>,
    meta: MetainfoOptions,
    walk: WalkOptions,
    mode: HashMode,
    progress: bool,
    json: bool,
    output_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    match cli.cmd {
        Cmd::Create {
            piece_size,
            announce,
            comment,
            private,
            source,
            no_date,
            media_only,
            threads,
            progress,
            json,
            output_dir,
            inputs,
        } => {
            let meta = MetainfoOptions {
                announce,
                comment,
                private,
                source,
                creation_date: (!no_date).then(|| chrono::Utc::now().timestamp()),
                ..MetainfoOptions::default()
            };
            let opts = CreateOpts {
                piece_size,
                meta,
                walk: if media_only { WalkOptions::media_only() } else { WalkOptions::default() },
                mode: if threads > 0 { HashMode::Parallel { threads } } else { HashMode::Sequential },
                progress,
                json,
                output_dir,
            };
            create_all(&inputs, &opts)?
        }
        Cmd::Verify { torrent, root, follow_symlinks } => {
            verify(&torrent, &root, PathPolicy { follow_symlinks })?
        }
        Cmd::Info { torrent, json } => info(&torrent, json)?,
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    use tracing::Level;
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_size(s: &str) -> Result<u64, String> {
    let t = s.trim().to_uppercase();
    let (num, mul) = if let Some(n) = t.strip_suffix('K') {
        (n, 1u64 << 10)
    } else if let Some(n) = t.strip_suffix('M') {
        (n, 1u64 << 20)
    } else {
        (t.as_str(), 1u64)
    };
    let v: u64 = num.trim().parse().map_err(|_| format!("bad size {s}"))?;
    v.checked_mul(mul).ok_or_else(|| format!("size {s} too large"))
}

/// `<input>.torrent`, beside the input or inside `output_dir`.
fn output_path(input: &Path, output_dir: Option<&Path>) -> Result<PathBuf> {
    let abs = if input.file_name().is_some() {
        input.to_path_buf()
    } else {
        fs::canonicalize(input).with_context(|| format!("resolve {}", input.display()))?
    };
    let name = abs.file_name().ok_or_else(|| anyhow!("{} has no name", abs.display()))?;
    let mut file = name.to_os_string();
    file.push(".torrent");
    let dir = match output_dir {
        Some(d) => d.to_path_buf(),
        None => abs.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    Ok(dir.join(file))
}

fn create_all(inputs: &[PathBuf], opts: &CreateOpts) -> Result<()> {
    if let Some(dir) = &opts.output_dir {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }
    let mut failed = 0usize;
    for input in inputs {
        if let Err(e) = create(input, opts) {
            eprintln!("{}: {:#}", input.display(), e);
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} input(s) failed", failed, inputs.len());
    }
    Ok(())
}

fn create(input: &Path, opts: &CreateOpts) -> Result<()> {
    let out = output_path(input, opts.output_dir.as_deref())?;
    let mut generator = Generator::new(input)
        .walk_options(opts.walk.clone())
        .metainfo_options(opts.meta.clone())
        .mode(opts.mode);
    if let Some(ps) = opts.piece_size {
        generator = generator.piece_size(ps);
    }

    let torrent = if opts.progress {
        let prog = Progress::new(true);
        prog.start();
        let mut sink = prog.clone();
        let res = generator.run(&mut sink);
        prog.stop();
        res?
    } else {
        generator.run(&mut NoProgress)?
    };

    fs::write(&out, &torrent.bytes).with_context(|| format!("write {}", out.display()))?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&Summary::from(&torrent))?);
    } else {
        println!("{}  {}", torrent.info_hash, out.display());
    }
    Ok(())
}

fn read_torrent(path: &Path) -> Result<Torrent> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Metainfo::from_bytes(&bytes).with_context(|| format!("decode {}", path.display()))
}

fn verify(torrent: &Path, root: &Path, policy: PathPolicy) -> Result<()> {
    let rep = orphtor_core::verify::verify_with_policy(torrent, root, policy)?;
    if rep.is_ok() {
        println!("OK: {} pieces ({})", rep.pieces_ok, rep.info_hash);
        return Ok(());
    }
    for f in &rep.missing_files {
        println!("missing or resized: {}", f);
    }
    println!("pieces ok: {}  bad: {}", rep.pieces_ok, rep.pieces_bad);
    bail!("{} does not match {}", root.display(), torrent.display())
}

fn info(path: &Path, json: bool) -> Result<()> {
    let torrent = read_torrent(path)?;
    let s = Summary::from(&torrent);
    if json {
        println!("{}", serde_json::to_string_pretty(&s)?);
        return Ok(());
    }
    println!("Name:       {}", s.name);
    println!("Info hash:  {}", s.info_hash);
    println!("Piece size: {} ({} pieces)", s.piece_size, s.pieces);
    println!("Total size: {}", s.total_size);
    if let Some(src) = &s.source {
        println!("Source:     {}", src);
    }
    for url in &s.announce {
        println!("Tracker:    {}", url);
    }
    println!("Files:");
    for f in &s.files {
        println!("  {} ({})", f.path, f.size);
    }
    Ok(())
}
