use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use clap::Parser;
use gles_compute::conv2d::{convolve_reference, Conv2d, PIXEL_SIZE, SHARPEN};
use gles_compute::gpu::{DeviceResource, LocalSize};
use gles_compute::session::DEFAULT_DEVICE_PATH;
use gles_compute::{describe_code, ComputeError, Error, Session, SessionConfig, Verbosity};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::{Rng, SeedableRng};

const EXIT_MISMATCH: i32 = 1;
const EXIT_IO: i32 = 2;
const EXIT_BRING_UP: i32 = 3;
const EXIT_COMPUTE: i32 = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless GLES compute: 2D convolution on a render node", long_about = None)]
struct Args {
    /// Direct-rendering device node
    #[arg(short, long, default_value = DEFAULT_DEVICE_PATH)]
    device: PathBuf,

    /// Diagnostic verbosity: 0 = none, 1 = high, 2 = medium+, 3 = low+, 4 = all
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(0..=4))]
    verbosity: u32,

    #[arg(long, default_value_t = 64)]
    width: u32,

    #[arg(long, default_value_t = 64)]
    height: u32,

    /// Raw RGBA8 input (width * height * 4 bytes); random pixels if omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Raw RGBA8 output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for the random input image
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Square local work-group size
    #[arg(long, default_value_t = 16)]
    local_size: u32,

    /// Number of convolution passes
    #[arg(short = 'n', long, default_value_t = 1)]
    iterations: u64,

    #[arg(long, help = "Stop repeating after this long (e.g., '30s', '2m')")]
    duration: Option<String>,

    /// Compare the result against the host reference
    #[arg(long, default_value_t = false)]
    check: bool,

    /// Print active uniforms and resource declarations
    #[arg(long, default_value_t = false)]
    list_resources: bool,

    /// Deliver driver diagnostics synchronously
    #[arg(long, default_value_t = false)]
    sync_debug: bool,
}

fn parse_duration(s: &str) -> Option<Duration> {
    humantime::parse_duration(s).ok()
}

/// Deterministic opaque RGBA8 image.
fn random_image(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut pixels = vec![0u8; width as usize * height as usize * PIXEL_SIZE];
    for px in pixels.chunks_exact_mut(PIXEL_SIZE) {
        rng.fill(&mut px[..3]);
        px[3] = u8::MAX;
    }
    pixels
}

fn load_input(args: &Args) -> Result<Vec<u8>, Error> {
    let expected = args.width as usize * args.height as usize * PIXEL_SIZE;
    match &args.input {
        Some(path) => {
            let data = std::fs::read(path)?;
            if data.len() != expected {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "{} holds {} bytes, expected {} for {}x{} RGBA8",
                        path.display(),
                        data.len(),
                        expected,
                        args.width,
                        args.height
                    ),
                )
                .into());
            }
            Ok(data)
        }
        None => Ok(random_image(args.width, args.height, args.seed)),
    }
}

fn exit_code(e: &Error) -> i32 {
    match e {
        Error::Io(_) => EXIT_IO,
        Error::BringUp(_) => EXIT_BRING_UP,
        Error::Compute(_) | Error::Queue(_) => EXIT_COMPUTE,
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let should_stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&should_stop);
    if let Err(e) = ctrlc::set_handler(move || stop_flag.store(true, Ordering::Relaxed)) {
        warn!("could not install interrupt handler: {}", e);
    }

    let config = SessionConfig {
        device_path: args.device.clone(),
        verbosity: Verbosity::from_level(args.verbosity).unwrap_or_default(),
        synchronous_diagnostics: args.sync_debug,
        ..SessionConfig::default()
    };
    let mut session = Session::new(config);

    let result = run(&args, &mut session, &should_stop);
    if let Err(e) = session.drain_diagnostics_to(&mut std::io::stderr()) {
        warn!("could not write diagnostics: {}", e);
    }
    session.teardown();

    match result {
        Ok(0) => std::process::exit(0),
        Ok(mismatches) => {
            eprintln!("MISMATCH: {} byte(s) differ from the host reference", mismatches);
            std::process::exit(EXIT_MISMATCH);
        }
        Err(e) => {
            if let Error::BringUp(bring_up) = &e {
                eprintln!("Error {}: {}", bring_up.code(), describe_code(bring_up.code()));
            }
            eprintln!("Error: {}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

/// Runs the convolution and returns the number of bytes differing from the reference.
fn run(args: &Args, session: &mut Session, should_stop: &AtomicBool) -> Result<usize, Error> {
    let input = load_input(args)?;
    let local_size = LocalSize::new(args.local_size, args.local_size, 1)?;

    session.bring_up()?;
    if let Some(gl) = session.gl_info() {
        println!("Renderer: {} ({})", gl.renderer, gl.version);
    }
    let ctx = session.context()?;

    let mut conv = Conv2d::new(local_size, args.width, args.height)?;
    conv.init(ctx, &SHARPEN)?;

    let mut output = vec![0u8; conv.image_size()];
    let result = if args.list_resources {
        print_resources(&conv, ctx)
    } else {
        Ok(())
    }
    .and_then(|()| convolve(args, &conv, ctx, &input, &mut output, should_stop));
    let destroyed = conv.destroy(ctx);
    result?;
    destroyed?;

    if let Some(path) = &args.output {
        write_output(path, &output)?;
    }

    if args.check {
        let reference = convolve_reference(&input, args.width, args.height, &SHARPEN)?;
        let mismatches = reference.iter().zip(&output).filter(|(a, b)| a != b).count();
        println!("Reference check: {} mismatching byte(s)", mismatches);
        return Ok(mismatches);
    }
    Ok(0)
}

fn convolve(
    args: &Args,
    conv: &Conv2d,
    ctx: &gles_compute::DeviceContext,
    input: &[u8],
    output: &mut [u8],
    should_stop: &AtomicBool,
) -> Result<(), Error> {
    let timeout = args.duration.as_deref().and_then(parse_duration);
    let pb = ProgressBar::new(args.iterations);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let start = Instant::now();
    let mut passes = 0u64;
    for _ in 0..args.iterations {
        if should_stop.load(Ordering::Relaxed) {
            warn!("interrupted after {} pass(es)", passes);
            break;
        }
        if timeout.is_some_and(|t| start.elapsed() >= t) {
            info!("time limit reached after {} pass(es)", passes);
            break;
        }
        conv.run(ctx, input, output)?;
        passes += 1;
        pb.inc(1);
    }
    pb.finish_and_clear();

    let elapsed = start.elapsed();
    let bytes = conv.image_size() as u64 * 2 * passes;
    println!();
    println!("Convolution Complete");
    println!("====================");
    println!("Image: {}x{} ({})", args.width, args.height, ByteSize::b(conv.image_size() as u64));
    println!("Passes: {}", passes);
    println!("Transferred: {}", ByteSize::b(bytes));
    println!("Duration: {}", humantime::format_duration(whole_micros(elapsed)));
    if passes > 0 {
        let per_pass = elapsed / u32::try_from(passes).unwrap_or(u32::MAX);
        println!("Per pass: {}", humantime::format_duration(whole_micros(per_pass)));
    }
    info!("{} pass(es) in {:.3}s", passes, elapsed.as_secs_f64());
    Ok(())
}

/// Truncates to whole microseconds so durations print compactly.
fn whole_micros(d: Duration) -> Duration {
    Duration::from_micros(d.as_micros() as u64)
}

fn print_resources(conv: &Conv2d, ctx: &gles_compute::DeviceContext) -> Result<(), Error> {
    println!("Program: {}", conv.program().glsl_layout());
    println!("  {}", conv.input().glsl_layout()?);
    println!("  {}", conv.output().glsl_layout()?);
    println!("  {}", conv.kernel().glsl_layout()?);
    for uniform in conv.program().active_uniforms(ctx)? {
        print!(
            "  uniform {} type=0x{:04X} size={} location={:?}",
            uniform.name, uniform.utype, uniform.size, uniform.location
        );
        match uniform.atomic_buffer_index {
            Some(index) => println!(" atomic_buffer={}", index),
            None => println!(),
        }
    }
    match conv.program().active_storage_blocks(ctx) {
        Ok(blocks) => {
            for block in blocks {
                println!(
                    "  storage block {} index={} binding={}",
                    block.name, block.index, block.binding
                );
            }
        }
        Err(ComputeError::Unsupported(entry)) => warn!("cannot list storage blocks: no {}", entry),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn write_output(path: &Path, output: &[u8]) -> Result<(), Error> {
    std::fs::write(path, output)?;
    println!("Wrote {} to {}", ByteSize::b(output.len() as u64), path.display());
    Ok(())
}
