use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use block_dev::BlockDevice;
use chain_fs::{ChainFileSystem, Clock, FormatOptions, OpenFlag};

use crate::BlockFile;

fn image(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("chain-fs-{}-{name}.img", std::process::id()))
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(|| 0u64)
}

#[test]
fn block_file_bounds() {
    let path = image("bounds");
    let file = BlockFile::create(&path, 8, 1024).unwrap();
    assert_eq!(8 * 1024, fs::metadata(&path).unwrap().len());

    let block = [0x5A; 1024];
    assert_eq!(1, file.write_blocks(7, &block));
    assert_eq!(0, file.write_blocks(8, &block));
    assert_eq!(0, file.write_blocks(0, &block[..512]));

    let mut buf = [0; 2048];
    assert_eq!(2, file.read_blocks(6, &mut buf));
    assert!(buf[..1024].iter().all(|&b| b == 0));
    assert_eq!(block, buf[1024..]);

    fs::remove_file(path).unwrap();
}

#[test]
fn reopen_negotiates_geometry() {
    let path = image("reopen");
    let dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::create(&path, 128, 1024).unwrap());
    let options = FormatOptions {
        total_blocks: 128,
        block_size: 1024,
        volume_name: "host",
    };
    let mut fs = ChainFileSystem::format(dev, &options, clock()).unwrap();
    let fd = fs
        .open("/hello", OpenFlag::WRONLY | OpenFlag::CREATE)
        .unwrap();
    fs.write(fd, b"hello, world").unwrap();
    fs.unmount().unwrap();

    let dev = BlockFile::open(&path).unwrap();
    assert_eq!((128, 1024), (dev.total_blocks(), dev.block_size()));
    let mut fs = ChainFileSystem::mount(Arc::new(dev), clock()).unwrap();
    let fd = fs.open("/hello", OpenFlag::read_only()).unwrap();
    let mut buf = [0; 64];
    assert_eq!(12, fs.read(fd, &mut buf).unwrap());
    assert_eq!(b"hello, world", &buf[..12]);
    fs.unmount().unwrap();

    fs::remove_file(path).unwrap();
}

#[test]
fn foreign_images_are_refused() {
    let path = image("foreign");
    fs::write(&path, [0u8; 4096]).unwrap();
    let err = BlockFile::open(&path).unwrap_err();
    assert_eq!(std::io::ErrorKind::InvalidData, err.kind());
    fs::remove_file(path).unwrap();
}

#[test]
fn bad_block_size_is_refused() {
    let path = image("block-size");
    let dev = Arc::new(BlockFile::create(&path, 16, 512).unwrap());
    let options = FormatOptions {
        total_blocks: 16,
        block_size: 512,
        volume_name: "odd",
    };
    ChainFileSystem::format(dev, &options, clock())
        .unwrap()
        .unmount()
        .unwrap();

    // 超级块里的块大小字段紧跟在魔数、版本与总块数之后
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    for block_size in [0u64, 100, 1 << 20] {
        file.seek(SeekFrom::Start(16)).unwrap();
        file.write_all(&block_size.to_ne_bytes()).unwrap();
        let err = BlockFile::open(&path).unwrap_err();
        assert_eq!(std::io::ErrorKind::InvalidData, err.kind(), "{block_size}");
    }

    fs::remove_file(path).unwrap();
}
