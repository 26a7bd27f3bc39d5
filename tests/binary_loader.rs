use std::path::Path;

use spinn_dse::{
    chip::virtual_board::OpKind,
    config::{MAX_POSSIBLE_BINARY_SIZE, MAX_SAFE_BINARY_SIZE},
    loader::binary::{
        check_binary_size, load_and_flood, load_executable_images, BinaryImage, BinarySize,
        ExecutableFinder, ExecutableTargets,
    },
    CoreLocation, CoreSubsets, LoadError, PlatformConfig, VirtualBoard,
};

#[ctor::ctor]
fn test_init() {
    tracing_subscriber::util::SubscriberInitExt::init(
        tracing_subscriber::layer::SubscriberExt::with(
            tracing_subscriber::layer::SubscriberExt::with(
                tracing_subscriber::registry(),
                tracing_subscriber::fmt::layer(),
            ),
            tracing_subscriber::filter::EnvFilter::from_default_env(),
        ),
    );
}

fn cores(list: &[(u8, u8, u8)]) -> CoreSubsets {
    list.iter().map(|c| CoreLocation::from(*c)).collect()
}

/// 64-bit ELF with one loadable segment whose memory size is far larger
/// than the file.
fn elf_with_bss(memsz: u64) -> Vec<u8> {
    let mut elf = Vec::new();
    elf.extend_from_slice(b"\x7fELF");
    elf.extend_from_slice(&[2, 1, 1, 0]);
    elf.extend_from_slice(&[0; 8]);
    elf.extend_from_slice(&2u16.to_le_bytes()); // e_type
    elf.extend_from_slice(&0x28u16.to_le_bytes()); // e_machine
    elf.extend_from_slice(&1u32.to_le_bytes()); // e_version
    elf.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    elf.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
    elf.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    elf.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    elf.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    elf.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
    elf.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    elf.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    assert_eq!(elf.len(), 64);

    elf.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    elf.extend_from_slice(&5u32.to_le_bytes()); // R+X
    elf.extend_from_slice(&0u64.to_le_bytes()); // p_offset
    elf.extend_from_slice(&0u64.to_le_bytes()); // p_vaddr
    elf.extend_from_slice(&0u64.to_le_bytes()); // p_paddr
    elf.extend_from_slice(&120u64.to_le_bytes()); // p_filesz
    elf.extend_from_slice(&memsz.to_le_bytes()); // p_memsz
    elf.extend_from_slice(&4u64.to_le_bytes()); // p_align
    assert_eq!(elf.len(), 120);

    elf
}

#[test]
fn one_byte_over_possible_ceiling_never_floods() {
    let mut board = VirtualBoard::new();
    let image = BinaryImage::from_bytes(
        "huge.aplx",
        vec![0u8; MAX_POSSIBLE_BINARY_SIZE as usize + 1],
    );

    let result = load_and_flood(
        &mut board,
        &image,
        &cores(&[(0, 0, 1)]),
        30,
        &PlatformConfig::default(),
    );

    match result {
        Err(LoadError::BinaryTooLarge { size, limit, .. }) => {
            assert_eq!(size, MAX_POSSIBLE_BINARY_SIZE + 1);
            assert_eq!(limit, MAX_POSSIBLE_BINARY_SIZE);
        }
        other => panic!("expected BinaryTooLarge, got {other:?}"),
    }
    assert_eq!(board.count(OpKind::Flood), 0);
    assert!(board.ops().is_empty());
}

#[test]
fn between_ceilings_warns_but_loads() {
    let config = PlatformConfig::default();

    let at_safe = BinaryImage::from_bytes("a.aplx", vec![1; MAX_SAFE_BINARY_SIZE as usize]);
    assert_eq!(check_binary_size(&at_safe, &config).unwrap(), BinarySize::Ok);

    let at_possible =
        BinaryImage::from_bytes("b.aplx", vec![1; MAX_POSSIBLE_BINARY_SIZE as usize]);
    assert_eq!(
        check_binary_size(&at_possible, &config).unwrap(),
        BinarySize::AboveSafe
    );

    let mut board = VirtualBoard::new();
    load_and_flood(&mut board, &at_possible, &cores(&[(0, 0, 1)]), 30, &config).unwrap();
    assert_eq!(board.count(OpKind::Flood), 1);
}

#[test]
fn repeated_flood_sends_identical_payloads() {
    let config = PlatformConfig::default();
    let bytes: Vec<u8> = (0..=255).cycle().take(4000).collect();
    let image = BinaryImage::from_bytes("app.aplx", bytes.clone());
    let targets = cores(&[(0, 0, 1), (0, 0, 2), (1, 0, 1)]);

    let mut board = VirtualBoard::new();
    load_and_flood(&mut board, &image, &targets, 30, &config).unwrap();
    load_and_flood(&mut board, &image, &targets, 30, &config).unwrap();

    let floods = board.flood_images();
    assert_eq!(floods.len(), 2);
    assert_eq!(floods[0], floods[1]);
    assert_eq!(floods[0], bytes.as_slice());
    assert_eq!(image.bytes(), bytes.as_slice());
}

#[test]
fn empty_core_set_is_a_no_op() {
    let mut board = VirtualBoard::new();
    let image = BinaryImage::from_bytes("app.aplx", vec![1; 16]);
    load_and_flood(
        &mut board,
        &image,
        &CoreSubsets::new(),
        30,
        &PlatformConfig::default(),
    )
    .unwrap();
    assert!(board.ops().is_empty());
}

#[test]
fn elf_footprint_includes_zero_fill() {
    let small = elf_with_bss(1024);
    let image = BinaryImage::from_bytes("small.elf", small);
    assert_eq!(image.footprint(), 1024);

    let image = BinaryImage::from_bytes("bss.elf", elf_with_bss(40_000));
    assert_eq!(image.len(), 120);
    assert_eq!(image.footprint(), 40_000);
    assert!(matches!(
        check_binary_size(&image, &PlatformConfig::default()),
        Err(LoadError::BinaryTooLarge { size: 40_000, .. })
    ));

    let raw = BinaryImage::from_bytes("raw.aplx", vec![7; 300]);
    assert_eq!(raw.footprint(), 300);
}

#[test]
fn finder_searches_in_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    std::fs::write(second.path().join("a.aplx"), [1, 2, 3]).unwrap();
    std::fs::write(first.path().join("b.aplx"), [4]).unwrap();
    std::fs::write(second.path().join("b.aplx"), [5]).unwrap();

    let finder = ExecutableFinder::with_paths([first.path(), second.path()]);
    assert_eq!(
        finder.get_executable_path("a.aplx").unwrap(),
        second.path().join("a.aplx")
    );
    assert_eq!(
        finder.get_executable_path("b.aplx").unwrap(),
        first.path().join("b.aplx")
    );
    assert!(matches!(
        finder.get_executable_path("missing.aplx"),
        Err(LoadError::ExecutableNotFound(name)) if name == "missing.aplx"
    ));
}

#[test]
fn core_runs_at_most_one_binary() {
    let mut targets = ExecutableTargets::new();
    let core = CoreLocation::new(0, 0, 3);

    targets.add_processor(Path::new("/bin/a.aplx"), core).unwrap();
    targets.add_processor(Path::new("/bin/a.aplx"), core).unwrap();
    assert_eq!(targets.total_processors(), 1);

    match targets.add_processor(Path::new("/bin/b.aplx"), core) {
        Err(LoadError::DuplicateExecutableTarget {
            existing, requested, ..
        }) => {
            assert_eq!(existing, Path::new("/bin/a.aplx"));
            assert_eq!(requested, Path::new("/bin/b.aplx"));
        }
        other => panic!("expected duplicate target, got {other:?}"),
    }
    assert!(!targets.has_binary(Path::new("/bin/b.aplx")));
}

#[test]
fn executable_images_flood_per_binary() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.aplx");
    let b = dir.path().join("b.aplx");
    std::fs::write(&a, vec![0xA; 100]).unwrap();
    std::fs::write(&b, vec![0xB; 200]).unwrap();

    let mut targets = ExecutableTargets::new();
    targets.add_processor(&a, CoreLocation::new(0, 0, 1)).unwrap();
    targets.add_processor(&a, CoreLocation::new(1, 0, 1)).unwrap();
    targets.add_processor(&b, CoreLocation::new(0, 0, 2)).unwrap();

    let mut board = VirtualBoard::new();
    let loaded =
        load_executable_images(&mut board, &targets, 30, &PlatformConfig::default()).unwrap();

    assert_eq!(loaded, 3);
    let floods = board.flood_images();
    assert_eq!(floods.len(), 2);
    assert_eq!(floods[0], [0xAu8; 100].as_slice());
    assert_eq!(floods[1], [0xBu8; 200].as_slice());
    assert_eq!(
        board.core_state(CoreLocation::new(1, 0, 1)),
        Some((30, spinn_dse::CoreState::Running))
    );
}

#[test]
fn oversized_executable_stops_before_any_flood() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.aplx");
    let b = dir.path().join("b.aplx");
    std::fs::write(&a, vec![0; 10]).unwrap();
    std::fs::write(&b, vec![0; MAX_POSSIBLE_BINARY_SIZE as usize + 1]).unwrap();

    let mut targets = ExecutableTargets::new();
    targets.add_processor(&a, CoreLocation::new(0, 0, 1)).unwrap();
    targets.add_processor(&b, CoreLocation::new(0, 0, 2)).unwrap();

    let mut board = VirtualBoard::new();
    assert!(matches!(
        load_executable_images(&mut board, &targets, 30, &PlatformConfig::default()),
        Err(LoadError::BinaryTooLarge { .. })
    ));
    assert_eq!(board.count(OpKind::Flood), 0);
}
