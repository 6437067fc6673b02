use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{arg, command, value_parser};
use tracing_subscriber::EnvFilter;

use studio_bone_decode::animation::{AnimationDecoder, BoneMapping, DecodeRequest, Pose};
use studio_bone_decode::schema::Scene;
use studio_bone_decode::skeleton::BindPose;
use studio_bone_decode::staging::{AnimBlob, SeekSource};

fn parse_mask(value: &str) -> std::result::Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = command!()
        .arg(
            arg!(-s --scene <SCENE> "The scene.toml file describing the skeleton, bone weights and animation to decode. If not provided, the file is expected to be in the current directory.")
                .value_parser(value_parser!(PathBuf))
                .default_value("scene.toml")
        )
        .arg(
            arg!(-c --cycle <CYCLE> "Point in the animation to decode, from 0.0 (first frame) to 1.0 (last frame).")
                .value_parser(value_parser!(f32))
                .conflicts_with("samples")
        )
        .arg(
            arg!(-n --samples <SAMPLES> "Decode this many evenly spaced points across the whole animation.")
                .value_parser(value_parser!(u32).range(1..))
        )
        .arg(
            arg!(-m --mask <MASK> "Bone usage mask, decimal or 0x-prefixed hex. Overrides the scene's bone_mask.")
                .value_parser(parse_mask)
        )
        .arg(
            arg!(--stall <STALL> "Stall factor. Anything above 0 cross-fades the zeroframe cache over the decoded pose.")
                .value_parser(value_parser!(f32))
                .default_value("0")
        )
        .arg(arg!(<BLOB> "The animation blob to decode.").value_parser(value_parser!(PathBuf)))
        .get_matches()
        ;

    let scene_path = matches.get_one::<PathBuf>("scene").unwrap();
    let blob_path = matches.get_one::<PathBuf>("BLOB").unwrap();
    let stall = *matches.get_one::<f32>("stall").unwrap();

    let scene = Scene::load(scene_path).context("scene.toml")?;
    let bone_mask = matches.get_one::<u32>("mask").copied().unwrap_or(scene.bone_mask);

    let cycles: Vec<f32> = match (matches.get_one::<f32>("cycle"), matches.get_one::<u32>("samples")) {
        (Some(&cycle), _) => vec![cycle],
        (None, Some(&1)) | (None, None) => vec![0.0],
        (None, Some(&samples)) => (0..samples).map(|i| i as f32 / (samples - 1) as f32).collect(),
    };

    let source = SeekSource::new(File::open(blob_path).context("Animation blob")?).context("Animation blob")?;
    let blob = AnimBlob::new(source, scene.endian());

    let skeleton = scene.skeleton();
    let desc = scene.anim_desc().context("Animation descriptor")?;
    let weights = scene.weights();
    let tables = scene.virtual_tables();
    let mapping = match &tables {
        Some(tables) => BoneMapping::Virtual(tables.mapping()),
        None => BoneMapping::Direct,
    };

    let mut decoder = AnimationDecoder::new(&blob, scene.decode);
    let mut pose = Pose::new(skeleton.bone_count());
    for cycle in cycles {
        let request = DecodeRequest {
            desc: &desc,
            model_bones: &skeleton,
            mapping,
            bone_weight: &weights,
            cycle,
            bone_mask,
            stall,
        };
        let path = decoder
            .decode(&request, &mut pose)
            .with_context(|| format!("Decoding at cycle {}", cycle))?;

        println!("cycle {:.4} ({:?})", cycle, path);
        for (bone, (pos, quat)) in pose.pos.iter().zip(&pose.quat).enumerate() {
            println!(
                "  bone {:3}: pos [{:10.4}, {:10.4}, {:10.4}] quat [{:8.5}, {:8.5}, {:8.5}, {:8.5}]",
                bone, pos.x, pos.y, pos.z, quat.i, quat.j, quat.k, quat.w
            );
        }
    }

    let stats = decoder.stats();
    tracing::info!(transfers = stats.transfers, bytes = stats.bytes, barriers = stats.barriers, "done");
    Ok(())
}
