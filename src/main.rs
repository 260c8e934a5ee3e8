use std::path::PathBuf;

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::Error;
use fisb_978::{
    clock::Clock,
    config::Config,
    harvest::{
        Harvester,
        store::MemoryStore,
        vectors,
    },
    pipeline::{
        self,
        ProductOutput,
    },
    spool::{
        self,
        SpoolWriter,
    },
    trickle,
};
use tokio::{
    fs::File,
    io::{
        AsyncRead,
        stdin,
    },
    sync::oneshot,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Decode { file, spool } => {
            let output = if spool {
                ProductOutput::Spool(SpoolWriter::new(&args.config.spool_dir)?)
            }
            else {
                ProductOutput::Stdout
            };

            match file {
                Some(path) => {
                    let input: std::pin::Pin<Box<dyn AsyncRead + Send>> =
                        Box::pin(File::open(&path).await?);
                    pipeline::run_decode(input, &args.config, output).await?;
                }
                None => {
                    let input: std::pin::Pin<Box<dyn AsyncRead + Send>> = Box::pin(stdin());
                    pipeline::run_decode(input, &args.config, output).await?;
                }
            }
        }
        Command::Run { test } => {
            // In test mode the trickle driver writes a sync file with the
            // capture's clock offset; all expiration runs on that clock.
            let clock = if test.is_some() {
                Clock::from_sync_file(&args.config.sync_file)?
            }
            else {
                Clock::wall()
            };

            let mut harvester = Harvester::new(&args.config, clock, MemoryStore::new())?;
            if let Some(test_number) = test {
                harvester = harvester.with_test_group(test_number)?;
            }

            let (stop_tx, stop_rx) = oneshot::channel();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                let _ = stop_tx.send(());
            });

            harvester.run(stop_rx).await?;
        }
        Command::DumpVectors => {
            // Replay the spool snapshot into a fresh store and export its
            // vector layers; the spool files are left in place.
            std::fs::create_dir_all(&args.config.spool_dir)?;
            let mut harvester =
                Harvester::new(&args.config, Clock::wall(), MemoryStore::new())?;
            for path in spool::list(&args.config.spool_dir)? {
                harvester.apply(spool::read(&path)?)?;
            }

            let stdout = std::io::stdout();
            vectors::dump(harvester.store(), stdout.lock())?;
        }
        Command::ExpireSweep => {
            std::fs::create_dir_all(&args.config.spool_dir)?;
            let mut harvester =
                Harvester::new(&args.config, Clock::wall(), MemoryStore::new())?;
            for path in spool::list(&args.config.spool_dir)? {
                harvester.apply(spool::read(&path)?)?;
            }
            harvester.maintenance()?;
        }
        Command::Trickle { file } => {
            trickle::run(&file, &args.config).await?;
        }
    }

    Ok(())
}

#[derive(Debug, Parser)]
#[clap(name = "fisb978", about = "FIS-B 978 MHz decoder and curator")]
struct Args {
    #[clap(flatten)]
    config: Config,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a capture stream into products (stdout or spool).
    Decode {
        /// Capture file; stdin when omitted.
        file: Option<PathBuf>,

        /// Write products to the spool directory instead of stdout.
        #[clap(long)]
        spool: bool,
    },
    /// Curate: ingest the spool and maintain the current-state store.
    Run {
        /// Test group number: consume the trickle sync file and run the
        /// trigger schedule.
        #[clap(long)]
        test: Option<u32>,
    },
    /// Export current vector layers as CSV WKT.
    DumpVectors,
    /// Apply the spool and force one maintenance tick.
    ExpireSweep,
    /// Replay an archived capture at original pace.
    Trickle { file: PathBuf },
}
