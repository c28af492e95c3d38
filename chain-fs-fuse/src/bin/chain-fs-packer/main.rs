mod cli;

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chain_fs::{ChainFileSystem, Clock, EntryKind, FormatOptions, OpenFlag};
use chain_fs_fuse::BlockFile;
use clap::Parser;
use cli::{Cli, Command};
use typed_bytesize::ByteSizeIec;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Command::Format {
        blocks,
        block_size,
        name,
    } = &cli.command
    {
        return format(&cli.image, *blocks, *block_size, name);
    }

    let block_file = BlockFile::open(&cli.image)?;
    let mut fs = ChainFileSystem::mount(Arc::new(block_file), clock()).map_err(io::Error::other)?;
    let result = fs
        .set_current_dir(&cli.cwd)
        .map_err(io::Error::other)
        .and_then(|()| run(&mut fs, cli.command));
    // 命令失败也要卸载，把打开的文件关掉
    fs.unmount().map_err(io::Error::other)?;
    result
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    })
}

fn format(image: &Path, blocks: u32, block_size: usize, name: &str) -> io::Result<()> {
    let block_file = BlockFile::create(image, blocks as usize, block_size)?;
    let options = FormatOptions {
        total_blocks: blocks,
        block_size,
        volume_name: name,
    };
    let fs = ChainFileSystem::format(Arc::new(block_file), &options, clock())
        .map_err(io::Error::other)?;

    println!(
        "image={:?} blocks={blocks} block_size={block_size} free={}",
        image,
        ByteSizeIec(fs.free_blocks() * block_size as u64)
    );
    fs.unmount().map_err(io::Error::other)
}

fn run(fs: &mut ChainFileSystem, command: Command) -> io::Result<()> {
    match command {
        Command::Format { .. } => unreachable!("format runs without mounting"),
        Command::Info => info(fs),
        Command::Ls { dir } => {
            for entry in fs.read_dir(&dir).map_err(io::Error::other)? {
                let entry = entry.map_err(io::Error::other)?;
                match entry.kind().map_err(io::Error::other)? {
                    EntryKind::Directory => println!("d {:>10} {}/", "-", entry.name()),
                    EntryKind::File => println!("- {:>10} {}", entry.size, entry.name()),
                }
            }
        }
        Command::Mkdir { dir } => fs.mkdir(&dir).map_err(io::Error::other)?,
        Command::Put { host, path } => {
            let data = fs::read(&host)?;
            put(fs, &path, &data)?;
        }
        Command::Get { path, host } => fs::write(host, get(fs, &path)?)?,
        Command::Cat { path } => io::stdout().write_all(&get(fs, &path)?)?,
        Command::Touch { path } => {
            // 关闭时会重写目录项的修改时间
            let fd = fs
                .open(&path, OpenFlag::WRONLY | OpenFlag::CREATE)
                .map_err(io::Error::other)?;
            fs.close(fd).map_err(io::Error::other)?;
        }
        Command::Cp { src, dst } => {
            let data = get(fs, &src)?;
            put(fs, &dst, &data)?;
        }
        Command::Rm { path } => fs.delete(&path).map_err(io::Error::other)?,
        Command::Mv { src, dst } => fs.rename(&src, &dst).map_err(io::Error::other)?,
        Command::Pack { source } => {
            for host_file in fs::read_dir(&source)? {
                let host_file = host_file?;
                if !host_file.file_type()?.is_file() {
                    continue;
                }
                let name = host_file.file_name();
                let Some(name) = name.to_str() else {
                    log::warn!("skip non UTF-8 file name {name:?}");
                    continue;
                };

                let data = fs::read(host_file.path())?;
                put(fs, name, &data)?;
                println!("packed {name:?} ({})", ByteSizeIec(data.len() as u64));
            }
        }
    }

    Ok(())
}

fn info(fs: &ChainFileSystem) {
    let super_block = fs.super_block();
    let block_size = fs.block_size() as u64;
    // 文件头除去16字节的头部，其余都是数据块地址
    let max_file_size = (block_size - 16) / 4 * block_size;

    println!("volume:      {:?}", super_block.volume_name());
    println!("version:     {}", super_block.version());
    println!("block size:  {block_size}");
    println!(
        "blocks:      {} ({})",
        fs.total_blocks(),
        ByteSizeIec(fs.total_blocks() * block_size)
    );
    println!(
        "free:        {} ({})",
        fs.free_blocks(),
        ByteSizeIec(fs.free_blocks() * block_size)
    );
    println!("table:       {} blocks", super_block.table_blocks);
    println!("max file:    {}", ByteSizeIec(max_file_size));
    println!("created:     {}", super_block.create_time);
    println!("last mount:  {}", super_block.last_mount_time);
}

/// 整个覆盖卷内文件；放不下时报错
fn put(fs: &mut ChainFileSystem, path: &str, data: &[u8]) -> io::Result<()> {
    let fd = fs
        .open(path, OpenFlag::WRONLY | OpenFlag::CREATE | OpenFlag::TRUNC)
        .map_err(io::Error::other)?;
    let written = fs.write(fd, data).map_err(io::Error::other);
    fs.close(fd).map_err(io::Error::other)?;

    let written = written?;
    if written < data.len() {
        return Err(io::Error::other(format!(
            "{path:?}: only {written} of {} bytes fit",
            data.len()
        )));
    }
    Ok(())
}

fn get(fs: &mut ChainFileSystem, path: &str) -> io::Result<Vec<u8>> {
    let fd = fs
        .open(path, OpenFlag::read_only())
        .map_err(io::Error::other)?;

    let mut bytes = Vec::new();
    let mut buffer = [0u8; 4096];
    let result = loop {
        match fs.read(fd, &mut buffer) {
            Ok(0) => break Ok(bytes),
            Ok(len) => bytes.extend_from_slice(&buffer[..len]),
            Err(e) => break Err(io::Error::other(e)),
        }
    };

    fs.close(fd).map_err(io::Error::other)?;
    result
}
