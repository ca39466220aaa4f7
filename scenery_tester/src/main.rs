use anyhow::{Context, Result};
use clap::Parser;
use scenery_vision::config::ProcessConfig;
use scenery_vision::core_modules::tracker::Track;
use scenery_vision::graph::{Graph, Node, PortSpec, PortType};
use scenery_vision::nodes::{DetectorNode, ProbeHandle, ProbeNode, SourceNode, detector};
use scenery_vision::sources::{FrameSupplier, SourceConfig, SourceKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scenery_tester")]
#[command(about = "Runs the region detector and tracker on a frame source and logs the tracks")]
struct Args {
    /// Process configuration (JSON). Defaults are used when missing.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source configuration (JSON). Overridden by --images, --video and --camera.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Directory of still images to play in name order.
    #[arg(long, conflicts_with_all = ["video", "camera"])]
    images: Option<PathBuf>,

    /// Replay the image directory forever.
    #[arg(long, requires = "images")]
    looping: bool,

    /// Video file (requires the `opencv` feature).
    #[arg(long, conflicts_with = "camera")]
    video: Option<PathBuf>,

    /// Camera index (requires the `opencv` feature).
    #[arg(long)]
    camera: Option<i32>,

    /// Minimum time between frames in milliseconds; 0 runs flat out.
    #[arg(long)]
    cadence_ms: Option<u64>,

    /// Stop after this many processed frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    // --- 1. Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- 2. Argument Parsing & Configuration ---
    let args = Args::parse();
    let process = load_process_config(args.config.as_ref())?;
    let source = source_config(&args)?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&process)?);
        println!("{}", serde_json::to_string_pretty(&source)?);
        return Ok(());
    }

    // --- 3. Runtime ---
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    runtime.block_on(run(process, source, args.frames))
}

fn load_process_config(path: Option<&PathBuf>) -> Result<ProcessConfig> {
    let Some(path) = path else {
        return Ok(ProcessConfig::default());
    };
    if !path.exists() {
        warn!(path = %path.display(), "configuration file not found; using defaults");
        return Ok(ProcessConfig::default());
    }
    ProcessConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn source_config(args: &Args) -> Result<SourceConfig> {
    let mut config = match &args.source {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SourceConfig::default(),
    };

    if let Some(dir) = &args.images {
        config.source = SourceKind::ImageSequence {
            dir: dir.clone(),
            looping: args.looping,
        };
    } else if let Some(path) = &args.video {
        config.source = SourceKind::VideoFile { path: path.clone() };
    } else if let Some(index) = args.camera {
        config.source = SourceKind::Camera { index };
    }
    if let Some(cadence_ms) = args.cadence_ms {
        config.cadence_ms = cadence_ms;
    }
    Ok(config)
}

/// The tester's graph: source -> detector, with one single-input `ProbeNode` per
/// watched detector output. The tracks sink runs exactly once per frame.
struct Pipeline {
    graph: Graph,
    source: Arc<Node>,
    detector: Arc<Node>,
    tracks: ProbeHandle,
    regions: ProbeHandle,
}

impl Pipeline {
    fn build(
        process: ProcessConfig,
        supplier: Box<dyn FrameSupplier>,
        buffer_depth: usize,
    ) -> Result<Self> {
        let mut graph = Graph::new();
        let source = graph.add_node(Box::new(SourceNode::new(supplier, buffer_depth)));
        let detector = graph.add_node(Box::new(DetectorNode::new(process)));
        let (regions_sink, regions) = ProbeNode::new(vec![PortSpec::new("regions", PortType::Record)]);
        let (tracks_sink, tracks) = ProbeNode::new(vec![PortSpec::new("filtered", PortType::Record)]);
        let regions_sink = graph.add_node(Box::new(regions_sink));
        let tracks_sink = graph.add_node(Box::new(tracks_sink));

        graph.connect(source.id(), 0, detector.id(), detector::IMAGE_INPUT)?;
        // Regions first, so they are current when the tracks sink reports.
        graph.connect(detector.id(), detector::REGIONS_OUTPUT, regions_sink.id(), 0)?;
        graph.connect(detector.id(), detector::FILTERED_OUTPUT, tracks_sink.id(), 0)?;

        Ok(Self {
            graph,
            source,
            detector,
            tracks,
            regions,
        })
    }
}

async fn run(process: ProcessConfig, source: SourceConfig, frames: Option<u64>) -> Result<()> {
    // --- 4. Graph Construction ---
    let supplier = source.open().context("failed to open the frame source")?;
    let Pipeline {
        mut graph,
        source: source_node,
        detector: detector_node,
        tracks: mut tracks_handle,
        regions: regions_handle,
    } = Pipeline::build(process, supplier, source.buffer_depth)?;

    // --- 5. Main Processing Loop ---
    graph.start_source(source_node.id(), source.cadence())?;
    let mut seen = 0;
    loop {
        let next = seen + 1;
        let updated = tokio::select! {
            _ = tokio::signal::ctrl_c() => None,
            updated = tokio::time::timeout(Duration::from_millis(500), tracks_handle.wait_for(next)) => Some(updated),
        };
        match updated {
            None => {
                info!("interrupted");
                break;
            }
            Some(Ok(true)) => {
                seen = tracks_handle.updates();
                log_cycle(seen, &tracks_handle, &regions_handle);
            }
            Some(_) => {}
        }

        if frames.is_some_and(|limit| seen >= limit) {
            break;
        }
        if !graph.is_source_running(source_node.id()) && tracks_handle.updates() == seen {
            info!("source finished");
            break;
        }
    }

    // --- 6. Shutdown & Summary ---
    graph.shutdown().await;
    info!(
        frames = seen,
        detector_ms = detector_node.timing_result(),
        "processing complete"
    );
    Ok(())
}

fn log_cycle(frame: u64, tracks: &ProbeHandle, regions: &ProbeHandle) {
    let regions = regions
        .latest(0)
        .and_then(|p| p.as_regions().map(<[_]>::len))
        .unwrap_or(0);
    let Some(payload) = tracks.latest(0) else {
        return;
    };
    let tracks: &[Track] = payload.as_tracks().unwrap_or_default();
    let live = tracks.iter().filter(|t| t.is_live()).count();

    info!(frame, regions, live, "cycle");
    for (slot, track) in tracks.iter().enumerate().filter(|(_, t)| t.is_live()) {
        info!(
            frame,
            slot,
            age = track.age,
            x = track.point.x,
            y = track.point.y,
            real_x = track.real_point.x,
            real_y = track.real_point.y,
            angle = track.angle,
            "track"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenery_vision::core_modules::frame::{BGR_CHANNELS, Frame};
    use scenery_vision::error::SourceError;

    /// A fixed number of black frames with one red pixel.
    struct Dots(u32);

    impl FrameSupplier for Dots {
        fn grab(&mut self, frame: &mut Frame) -> Result<(), SourceError> {
            if self.0 == 0 {
                return Err(SourceError::Exhausted);
            }
            self.0 -= 1;
            frame.reshape(8, 4, BGR_CHANNELS);
            frame.data.fill(0);
            frame.pixel_mut(2, 2).copy_from_slice(&[0, 0, 255]);
            Ok(())
        }
    }

    #[test]
    fn tracks_handle_counts_each_frame_once() {
        let pipeline = Pipeline::build(ProcessConfig::new(8, 4), Box::new(Dots(3)), 2).expect("build");
        for _ in 0..3 {
            assert!(pipeline.graph.trigger(pipeline.source.id()).expect("frame"));
        }
        assert_eq!(pipeline.tracks.updates(), 3);
        assert_eq!(pipeline.regions.updates(), 3);
        let regions = pipeline.regions.latest(0).expect("port");
        assert_eq!(regions.as_regions().map(<[_]>::len), Some(1));
    }
}
