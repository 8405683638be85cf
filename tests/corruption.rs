//! Fault-injection scenarios: the filesystem over a medium suffering bit
//! flips and byte corruption.

use ppfs::fs::{OpenMode, ROOT_INODE};
use ppfs::storage::HeapStorage;
use ppfs::{EccType, FsConfig, FsError, Ppfs};

fn formatted_with(ecc_type: EccType, block_size: u32, total_size: u64) -> Ppfs<HeapStorage> {
    let fs = Ppfs::new(HeapStorage::new(total_size as usize));
    fs.format(&FsConfig {
        total_size,
        average_file_size: 2048,
        block_size,
        ecc_type,
        ..FsConfig::default()
    })
    .unwrap();
    fs
}

/// The root directory body claims the first data blocks (one 128-byte
/// entry, however many payload blocks that spans); the first file written
/// afterwards lands right behind it.
fn first_file_block(fs: &Ppfs<HeapStorage>) -> u32 {
    let sb = fs.superblock().unwrap();
    let data_size = fs.attributes(ROOT_INODE).unwrap().block_size as u32;
    sb.first_data_block_address + (128 + data_size - 1) / data_size
}

#[test]
fn hamming_corrects_a_single_flip_under_the_file() {
    for bit_in_block in [0u64, 5, 17, 42, 77, 99, 127] {
        let fs = formatted_with(EccType::Hamming, 16, 64 << 10);
        fs.create("/s").unwrap();

        let fd = fs.open("/s", OpenMode::NORMAL).unwrap();
        fs.write(fd, b"slay").unwrap();
        fs.close(fd).unwrap();

        let block = first_file_block(&fs) as u64;
        let mut storage = fs.into_storage();
        storage.flip_bit(block * 16 * 8 + bit_in_block);

        let fs = Ppfs::new(storage);
        fs.init().unwrap();
        let fd = fs.open("/s", OpenMode::NORMAL).unwrap();
        assert_eq!(
            fs.read(fd, 4).unwrap(),
            b"slay",
            "flip at bit {bit_in_block} not corrected"
        );
        fs.close(fd).unwrap();
    }
}

#[test]
fn crc_detects_a_flip_in_the_data_region() {
    let fs = formatted_with(EccType::Crc, 512, 1 << 20);
    fs.create("/x").unwrap();

    let fd = fs.open("/x", OpenMode::NORMAL).unwrap();
    fs.write(fd, &[0x42; 256]).unwrap();
    fs.close(fd).unwrap();

    let block = first_file_block(&fs) as u64;
    let mut storage = fs.into_storage();
    storage.flip_bit(block * 512 * 8 + 100 * 8 + 3);

    let fs = Ppfs::new(storage);
    fs.init().unwrap();
    let fd = fs.open("/x", OpenMode::NORMAL).unwrap();
    assert_eq!(fs.read(fd, 256).unwrap_err(), FsError::Correction);
}

#[test]
fn parity_detects_a_flip_and_refuses_the_block() {
    let fs = formatted_with(EccType::Parity, 512, 1 << 20);
    fs.create("/p").unwrap();

    let fd = fs.open("/p", OpenMode::NORMAL).unwrap();
    fs.write(fd, &[0x10; 64]).unwrap();
    fs.close(fd).unwrap();

    let block = first_file_block(&fs) as u64;
    let mut storage = fs.into_storage();
    storage.flip_bit(block * 512 * 8 + 10);

    let fs = Ppfs::new(storage);
    fs.init().unwrap();
    let fd = fs.open("/p", OpenMode::NORMAL).unwrap();
    assert_eq!(fs.read(fd, 64).unwrap_err(), FsError::Correction);

    // Writing through the corrupted block is refused too; the medium stays
    // as the flip left it.
    fs.seek(fd, 0).unwrap();
    assert_eq!(fs.write(fd, &[0u8; 8]).unwrap_err(), FsError::Correction);
}

#[test]
fn reed_solomon_corrects_t_corrupted_bytes() {
    // 256-byte blocks clamp to the 255-byte codeword; t = 3.
    let fs = formatted_with(EccType::ReedSolomon, 256, 1 << 20);
    fs.create("/r").unwrap();

    let fd = fs.open("/r", OpenMode::NORMAL).unwrap();
    fs.write(fd, &[0xAB; 128]).unwrap();
    fs.close(fd).unwrap();

    let block = first_file_block(&fs) as u64;
    let mut storage = fs.into_storage();
    for raw_offset in [10u64, 100, 200] {
        let index = (block * 255 + raw_offset) as usize;
        storage.bytes_mut()[index] ^= 0x5A;
    }

    let fs = Ppfs::new(storage);
    fs.init().unwrap();
    let fd = fs.open("/r", OpenMode::NORMAL).unwrap();
    assert_eq!(fs.read(fd, 128).unwrap(), [0xAB; 128]);
    fs.close(fd).unwrap();

    // A second read sees the repaired block on the medium.
    let fd2 = fs.open("/r", OpenMode::NORMAL).unwrap();
    assert_eq!(fs.read(fd2, 128).unwrap(), [0xAB; 128]);
}

#[test]
fn every_codec_round_trips_under_a_clean_medium() {
    for (ecc_type, block_size) in [
        (EccType::None, 512u32),
        (EccType::Parity, 512),
        (EccType::Crc, 512),
        (EccType::Hamming, 256),
        (EccType::ReedSolomon, 256),
    ] {
        let fs = formatted_with(ecc_type, block_size, 1 << 20);
        fs.create("/payload").unwrap();

        let fd = fs.open("/payload", OpenMode::NORMAL).unwrap();
        let payload: Vec<u8> = (0..5000).map(|i| (i % 251) as u8).collect();
        fs.write(fd, &payload).unwrap();
        fs.seek(fd, 0).unwrap();
        assert_eq!(
            fs.read(fd, payload.len()).unwrap(),
            payload,
            "round trip failed for {ecc_type:?}"
        );
        fs.close(fd).unwrap();
    }
}

#[test]
fn mount_survives_a_destroyed_primary_superblock() {
    let fs = formatted_with(EccType::None, 512, 1 << 20);
    fs.create("/kept").unwrap();

    let mut storage = fs.into_storage();
    storage.bytes_mut()[..53].fill(0xFF);

    let fs = Ppfs::new(storage);
    fs.init().unwrap();
    assert_eq!(fs.read_directory("/").unwrap(), vec!["kept"]);

    // The primary copy was rewritten from the backup.
    let storage = fs.into_storage();
    assert_eq!(&storage.bytes()[..4], b"PPFS");
}
