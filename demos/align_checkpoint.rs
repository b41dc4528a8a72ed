use std::path::PathBuf;
use std::time::Instant;

use zonos_rs::weights::{Checkpoint, CheckpointManifest};

/// Usage: align_checkpoint <weights.npz> <manifest.json> <out.npz> [--train]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("usage: align_checkpoint <weights.npz> <manifest.json> <out.npz> [--train]");
        std::process::exit(2);
    }
    let weights = PathBuf::from(&args[0]);
    let manifest_path = PathBuf::from(&args[1]);
    let out = PathBuf::from(&args[2]);
    let training = args.iter().any(|a| a == "--train");

    let manifest = CheckpointManifest::load(&manifest_path)?;
    let load_start = Instant::now();
    let mut checkpoint = Checkpoint::load(&weights, manifest)?;
    println!(
        "Loaded {} layers in {:.2?}",
        checkpoint.len(),
        load_start.elapsed()
    );

    if training {
        checkpoint.pad_for_training()?;
    } else {
        checkpoint.pad_for_inference()?;
    }

    for (name, layer) in checkpoint.layers() {
        println!("{name:<32} {:<12} {:?}", layer.kind(), layer.shape());
    }

    checkpoint.save(&out)?;
    println!("Saved to {}", out.display());
    Ok(())
}
