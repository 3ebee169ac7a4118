#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use flatfs::{
    BLOCK_SIZE, BlockDevice, ByteBlockDevice, FileByteDevice, FileSystem, OpenMode, SeekWhence,
};
use serde::Serialize;
use std::env;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct VolumeInfo {
    block_size: usize,
    total_blocks: u32,
    inode_count: u32,
    files: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "mkfs" => {
            let (Some(image), Some(blocks), Some(max_files)) =
                (args.next(), args.next(), args.next())
            else {
                bail!("mkfs requires <image-path> <blocks> <max-files>");
            };
            let blocks: u32 = blocks.parse().context("blocks must be a number")?;
            let max_files: u32 = max_files.parse().context("max-files must be a number")?;
            mkfs(Path::new(&image), blocks, max_files)
        }
        "info" => {
            let Some(image) = args.next() else {
                bail!("info requires <image-path>");
            };
            let json = args.any(|arg| arg == "--json");
            info(Path::new(&image), json)
        }
        "ls" => {
            let Some(image) = args.next() else {
                bail!("ls requires <image-path>");
            };
            ls(Path::new(&image))
        }
        "put" => {
            let (Some(image), Some(source)) = (args.next(), args.next()) else {
                bail!("put requires <image-path> <source-file> [name]");
            };
            let name = args.next();
            put(Path::new(&image), Path::new(&source), name.as_deref())
        }
        "get" => {
            let (Some(image), Some(name), Some(dest)) = (args.next(), args.next(), args.next())
            else {
                bail!("get requires <image-path> <name> <dest-file>");
            };
            get(Path::new(&image), &name, Path::new(&dest))
        }
        "rm" => {
            let (Some(image), Some(name)) = (args.next(), args.next()) else {
                bail!("rm requires <image-path> <name>");
            };
            rm(Path::new(&image), &name)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("flatfs-cli\n");
    println!("USAGE:");
    println!("  flatfs-cli mkfs <image-path> <blocks> <max-files>");
    println!("  flatfs-cli info <image-path> [--json]");
    println!("  flatfs-cli ls <image-path>");
    println!("  flatfs-cli put <image-path> <source-file> [name]");
    println!("  flatfs-cli get <image-path> <name> <dest-file>");
    println!("  flatfs-cli rm <image-path> <name>");
}

fn mount(image: &Path) -> Result<FileSystem> {
    let file = FileByteDevice::open(image)
        .with_context(|| format!("failed to open image: {}", image.display()))?;
    let dev: Arc<dyn BlockDevice> = Arc::new(
        ByteBlockDevice::new(file)
            .with_context(|| format!("not a block-aligned image: {}", image.display()))?,
    );
    FileSystem::mount(dev).context("failed to mount volume")
}

fn mkfs(image: &Path, blocks: u32, max_files: u32) -> Result<()> {
    let file = std::fs::File::create(image)
        .with_context(|| format!("failed to create image: {}", image.display()))?;
    file.set_len(u64::from(blocks) * BLOCK_SIZE as u64)
        .context("failed to size image")?;
    drop(file);

    let fs = mount(image)?;
    fs.format(max_files).context("format failed")?;
    fs.sync().context("sync failed")?;
    println!(
        "formatted {} ({blocks} blocks, {} inodes)",
        image.display(),
        fs.inode_count()
    );
    Ok(())
}

fn info(image: &Path, json: bool) -> Result<()> {
    let fs = mount(image)?;
    let output = VolumeInfo {
        block_size: BLOCK_SIZE,
        total_blocks: fs.total_blocks(),
        inode_count: fs.inode_count(),
        files: fs.list().len(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("block_size: {}", output.block_size);
        println!("total_blocks: {}", output.total_blocks);
        println!("inode_count: {}", output.inode_count);
        println!("files: {}", output.files);
    }
    Ok(())
}

fn ls(image: &Path) -> Result<()> {
    let fs = mount(image)?;
    for (inumber, name) in fs.list() {
        let handle = fs
            .open(&name, OpenMode::Read)
            .with_context(|| format!("failed to open {name}"))?;
        let size = fs.fsize(&handle);
        fs.close(handle).map_err(anyhow::Error::from)?;
        println!("{:>4}  {size:>10}  {name}", inumber.0);
    }
    Ok(())
}

fn put(image: &Path, source: &Path, name: Option<&str>) -> Result<()> {
    let data = std::fs::read(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    let name = match name {
        Some(name) => name.to_owned(),
        None => source
            .file_name()
            .context("source path has no file name")?
            .to_string_lossy()
            .into_owned(),
    };

    let fs = mount(image)?;
    let handle = fs
        .open(&name, OpenMode::Write)
        .with_context(|| format!("failed to open {name}"))?;
    let written = fs.write(&handle, &data).context("write failed")?;
    fs.close(handle).map_err(anyhow::Error::from)?;
    fs.sync().context("sync failed")?;
    println!("wrote {written} bytes to {name}");
    Ok(())
}

fn get(image: &Path, name: &str, dest: &Path) -> Result<()> {
    let fs = mount(image)?;
    let handle = fs
        .open(name, OpenMode::Read)
        .with_context(|| format!("failed to open {name}"))?;
    fs.seek(&handle, 0, SeekWhence::Start)
        .map_err(anyhow::Error::from)?;
    let mut data = vec![0_u8; fs.fsize(&handle) as usize];
    let read = fs.read(&handle, &mut data).context("read failed")?;
    data.truncate(read);
    fs.close(handle).map_err(anyhow::Error::from)?;

    std::fs::write(dest, &data)
        .with_context(|| format!("failed to write {}", dest.display()))?;
    println!("read {read} bytes from {name}");
    Ok(())
}

fn rm(image: &Path, name: &str) -> Result<()> {
    let fs = mount(image)?;
    if !fs.delete(name) {
        bail!("failed to delete {name}");
    }
    fs.sync().context("sync failed")?;
    println!("deleted {name}");
    Ok(())
}
