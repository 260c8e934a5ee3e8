//! Stage wiring.
//!
//! Each decode stage runs as its own task, single-threaded over its
//! mutable state, connected by bounded channels that provide ordering and
//! back pressure. Closing the source drains the whole chain: every stage
//! exits when its input channel closes, and the last products land in the
//! spool (or on stdout) before the pipeline returns.

use futures_util::StreamExt;
use tokio::{
    io::AsyncRead,
    sync::mpsc,
};
use tracing::info;

use crate::{
    capture,
    config::Config,
    dedup::ChangeFilter,
    frame::Packet,
    products::{
        Product,
        Synthesizer,
    },
    reassembly::Reassembler,
    rsr::RsrTracker,
    sink::ErrorSink,
    spool::SpoolWriter,
};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline i/o error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Spool(#[from] crate::spool::Error),

    #[error("stage task failed")]
    Join(#[from] tokio::task::JoinError),
}

/// Where finished products go.
pub enum ProductOutput {
    /// One JSON object per line.
    Stdout,
    /// Spool files for the curator.
    Spool(SpoolWriter),
}

impl ProductOutput {
    fn write(&mut self, product: &Product) -> Result<(), PipelineError> {
        match self {
            Self::Stdout => {
                let line =
                    serde_json::to_string(product).map_err(crate::spool::Error::from)?;
                println!("{line}");
                Ok(())
            }
            Self::Spool(writer) => {
                writer.write(product, chrono::Utc::now())?;
                Ok(())
            }
        }
    }
}

/// Run the decode side (frame parse, reassembly, synthesis, change filter)
/// over a capture stream until it ends.
pub async fn run_decode<R>(
    input: R,
    config: &Config,
    mut output: ProductOutput,
) -> Result<(), PipelineError>
where
    R: AsyncRead + Send + 'static,
{
    let (packet_tx, mut packet_rx) = mpsc::channel::<Packet>(CHANNEL_CAPACITY);
    let (reassembled_tx, mut reassembled_rx) = mpsc::channel::<Packet>(CHANNEL_CAPACITY);
    let (product_tx, mut product_rx) = mpsc::channel::<Product>(CHANNEL_CAPACITY);

    // Frame parse, with optional reception tracking. RSR products are
    // born here and skip straight to the product channel; everything else
    // decodes through the chain.
    let parser_config = config.clone();
    let rsr_product_tx = product_tx.clone();
    let parser = tokio::spawn(async move {
        let mut sink = ErrorSink::open("frame");
        let mut rsr = parser_config.rsr.then(|| RsrTracker::new(&parser_config));

        let reader = capture::Reader::new(Box::pin(input));
        let mut reader = std::pin::pin!(reader);

        while let Some(item) = reader.next().await {
            let line = match item {
                Ok(line) => line,
                Err(error) => {
                    sink.record(&error, None);
                    continue;
                }
            };

            let packet = match Packet::decode(&line, &parser_config) {
                Ok(packet) => packet,
                Err(error) => {
                    sink.record(&error, None);
                    continue;
                }
            };

            if let Some(rsr) = &mut rsr {
                if let Some(product) = rsr.observe(&packet) {
                    if rsr_product_tx.send(product).await.is_err() {
                        break;
                    }
                }
            }

            if parser_config.skip_empty_frames && packet.frames.is_empty() {
                continue;
            }

            if packet_tx.send(packet).await.is_err() {
                break;
            }
        }

        sink.count()
    });

    // Reassembly.
    let reassembly_config = config.clone();
    let reassembler_task = tokio::spawn(async move {
        let mut sink = ErrorSink::open("reassembly");
        let mut reassembler = Reassembler::new(&reassembly_config);

        while let Some(packet) = packet_rx.recv().await {
            let (packet, errors) = reassembler.process(packet);
            for error in errors {
                sink.record(&error, None);
            }

            if !packet.frames.is_empty() {
                if reassembled_tx.send(packet).await.is_err() {
                    break;
                }
            }
        }

        let counters = reassembler.counters();
        info!(
            segment_timeouts = counters.segment_timeouts,
            twgo_orphans = counters.twgo_orphans,
            "reassembly drained"
        );
        sink.count()
    });

    // Product synthesis.
    let synthesis_config = config.clone();
    let synthesizer_task = tokio::spawn(async move {
        let mut sink = ErrorSink::open("products");
        let synthesizer = Synthesizer::new(&synthesis_config);

        while let Some(packet) = reassembled_rx.recv().await {
            let (products, errors) = synthesizer.synthesize(&packet);
            for error in errors {
                sink.record(&error, None);
            }
            for product in products {
                if product_tx.send(product).await.is_err() {
                    return sink.count();
                }
            }
        }

        sink.count()
    });

    // Change filter feeding the output, on this task. Ends when the
    // parser and synthesis tasks have dropped their product senders.
    let mut filter = ChangeFilter::new(config);
    let mut forwarded: u64 = 0;
    let mut suppressed: u64 = 0;

    while let Some(product) = product_rx.recv().await {
        if filter.should_forward(&product) {
            forwarded += 1;
            output.write(&product)?;
        }
        else {
            suppressed += 1;
        }
    }

    let frame_errors = parser.await?;
    let reassembly_errors = reassembler_task.await?;
    let synthesis_errors = synthesizer_task.await?;

    info!(
        forwarded,
        suppressed,
        frame_errors,
        reassembly_errors,
        synthesis_errors,
        "decode pipeline drained"
    );

    Ok(())
}
