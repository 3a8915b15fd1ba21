//! fv1run - assemble and run an FV-1 SPN patch against a WAV file or a
//! synthetic test signal.
//!
//! Usage: fv1run <source.spn> [--wav <in> <out>] [--frames N] [--potN f] [--disassemble]

use clap::Parser;
use fv1::{disasm, Patch, Vm};
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "fv1run")]
#[command(author = "Christian Kuhl <christian.kuhl84@gmail.com>")]
#[command(version = "0.1.0")]
#[command(about = "Assemble and run an FV-1 SPN patch", long_about = None)]
struct Args {
    /// SPN source file to assemble and run
    source: PathBuf,

    /// Read `in.wav`, run it through the patch, write the result to
    /// `out.wav`, instead of the built-in test signal.
    #[arg(long, num_args = 2, value_names = ["IN", "OUT"])]
    wav: Option<Vec<PathBuf>>,

    /// Number of frames to run when --wav is not given
    #[arg(long, default_value = "44100")]
    frames: usize,

    /// POT0 value, 0.0-1.0
    #[arg(long, default_value = "0.0")]
    pot0: f32,

    /// POT1 value, 0.0-1.0
    #[arg(long, default_value = "0.0")]
    pot1: f32,

    /// POT2 value, 0.0-1.0
    #[arg(long, default_value = "0.0")]
    pot2: f32,

    /// Print the assembled program's disassembly and exit without running it
    #[arg(long)]
    disassemble: bool,

    /// Verbose logging (equivalent to RUST_LOG=debug)
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(&args.source)?;

    if args.disassemble {
        let patch = Patch::assemble(&source)?;
        let mut rom = Vec::new();
        for instr in &patch.instructions {
            rom.extend_from_slice(&fv1::opcode::encode(instr).to_be_bytes());
        }
        for line in disasm::disassemble_rom(&rom) {
            println!("{}", line);
        }
        for label in &patch.pot_labels {
            eprintln!("; {}", label);
        }
        return Ok(());
    }

    let mut vm = Vm::from_source(&source)?;
    log::debug!("assembled {} with {} pot label(s)", args.source.display(), vm.pot_labels().len());

    match &args.wav {
        Some(paths) => process_wav(&mut vm, args, &paths[0], &paths[1])?,
        None => run_synthetic(&mut vm, args),
    }
    Ok(())
}

fn process_wav(vm: &mut Vm, args: &Args, in_path: &PathBuf, out_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(in_path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let out_spec = hound::WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(out_path, out_spec)?;

    let max_int = (1i64 << (spec.bits_per_sample - 1)) as f32;
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / max_int))
            .collect::<Result<_, _>>()?,
    };

    for frame in samples.chunks(channels) {
        let in_l = frame[0];
        let in_r = *frame.get(1).unwrap_or(&in_l);
        let (out_l, out_r) = vm.process(in_l, in_r, args.pot0, args.pot1, args.pot2);
        writer.write_sample(out_l)?;
        if channels > 1 {
            writer.write_sample(out_r)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// No WAV given: drive the patch with a unit impulse followed by silence, so
/// its impulse response (and any panics in it) can be inspected without
/// external assets.
fn run_synthetic(vm: &mut Vm, args: &Args) {
    for i in 0..args.frames {
        let s = if i == 0 { 1.0 } else { 0.0 };
        let (l, r) = vm.process(s, s, args.pot0, args.pot1, args.pot2);
        if i < 10 || i % 4410 == 0 {
            log::debug!("frame {}: in={:.4} out=({:.4}, {:.4})", i, s, l, r);
        }
    }
}
