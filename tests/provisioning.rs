use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use fake_runtime::FakeRuntime;
use sc_arena::{
    configuration::DataDirs,
    error::ArenaError,
    provisioner::{
        download_bwta_caches, extract_bwta_caches, install, is_installed, ImageSpec, Provisioner,
        GAME_DOCKERFILE,
    },
};
use zip::write::SimpleFileOptions;

const UNREACHABLE_BWTA_URL: &str = "http://127.0.0.1:9/BWTA_cache.zip";

mod fake_runtime;

#[test]
fn ensure_network_is_idempotent() {
    let runtime = FakeRuntime::new();
    let provisioner = Provisioner::new(&runtime);

    let first = provisioner.ensure_network("sc_net", "172.18.0.0/16").unwrap();
    let second = provisioner.ensure_network("sc_net", "172.18.0.0/16").unwrap();

    assert_eq!(first, second);
    assert_eq!(runtime.count_calls("create_network"), 1);
    assert_eq!(runtime.count_calls("list_networks"), 2);
}

#[test]
fn unreachable_runtime_is_a_provisioning_error() {
    let runtime = FakeRuntime::new().unreachable();
    let res = Provisioner::new(&runtime).ensure_runtime_reachable();
    assert!(matches!(res, Err(ArenaError::Provisioning { .. })));
    assert_eq!(runtime.count_calls("probe"), 0);
}

#[test]
fn ensure_image_uses_cached_payload() {
    fake_runtime::init_debug_logger();
    let tmp = tempfile::tempdir().unwrap();
    let dirs = DataDirs::new(tmp.path());
    let mut image = ImageSpec::new("starcraft:test", &dirs);
    // would fail if a download was attempted
    image.payload_url = "http://127.0.0.1:9/starcraft.zip".to_string();
    fs::create_dir_all(&image.install_dir).unwrap();
    fs::write(image.payload_path(), b"zip").unwrap();

    let runtime = FakeRuntime::new();
    let provisioner = Provisioner::new(&runtime);
    provisioner.ensure_image(&image).unwrap();

    assert!(image.install_dir.join(GAME_DOCKERFILE).is_file());
    assert_eq!(
        runtime.calls(),
        [
            "image_exists starcraft:test",
            "pull ggaic/starcraft:java-1.0.4",
            "tag ggaic/starcraft:java-1.0.4 starcraft:java",
            "build starcraft:test",
        ]
    );

    provisioner.ensure_image(&image).unwrap();
    assert_eq!(runtime.count_calls("pull"), 1);
    assert_eq!(runtime.count_calls("build"), 1);
}

#[test]
fn failed_download_leaves_no_payload() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = DataDirs::new(tmp.path());
    let mut image = ImageSpec::new("starcraft:test", &dirs);
    image.payload_url = "http://127.0.0.1:9/starcraft.zip".to_string();

    let runtime = FakeRuntime::new();
    let res = Provisioner::new(&runtime).ensure_image(&image);

    assert!(matches!(res, Err(ArenaError::Provisioning { .. })));
    assert!(!image.payload_path().exists());
    assert_eq!(runtime.count_calls("build"), 0);
}

#[test]
fn install_replaces_image_and_creates_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = DataDirs::new(tmp.path().join("scbw"));
    let image = ImageSpec::new("starcraft:test", &dirs);
    fs::create_dir_all(&image.install_dir).unwrap();
    fs::write(image.payload_path(), b"zip").unwrap();

    let runtime = FakeRuntime::new().with_image("starcraft:test");
    assert!(is_installed(&runtime, "starcraft:test"));

    fs::create_dir_all(dirs.bwta()).unwrap();
    fs::write(dirs.bwta().join("known.bwta"), b"kept").unwrap();

    // unreachable caches do not fail the install
    install(&runtime, &dirs, &image, UNREACHABLE_BWTA_URL).unwrap();

    assert_eq!(runtime.count_calls("remove_image starcraft:test"), 1);
    assert_eq!(runtime.count_calls("build starcraft:test"), 1);
    assert_eq!(runtime.count_calls("create_network sc_net"), 1);
    assert!(dirs.all().iter().all(|dir| dir.is_dir()));
    assert!(is_installed(&runtime, "starcraft:test"));
    assert_eq!(fs::read(dirs.bwta().join("known.bwta")).unwrap(), b"kept");
}

fn write_cache_archive(path: &Path, entries: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn bwta_caches_never_overwrite_existing_files() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = DataDirs::new(tmp.path());
    let (bwta, bwta2) = (dirs.bwta(), dirs.bwta2());
    fs::create_dir_all(&bwta).unwrap();
    fs::write(bwta.join("a.bwta"), b"mine").unwrap();

    let archive = tmp.path().join("BWTA_cache.zip");
    write_cache_archive(
        &archive,
        &[
            ("bwapi-data/BWTA/a.bwta", "theirs"),
            ("bwapi-data/BWTA/b.bwta", "b"),
            ("bwapi-data/BWTA2/a.bwta", "bwta2"),
            ("readme.txt", "ignored"),
        ],
    );

    assert_eq!(extract_bwta_caches(&archive, &bwta, &bwta2).unwrap(), 2);
    assert_eq!(fs::read(bwta.join("a.bwta")).unwrap(), b"mine");
    assert_eq!(fs::read(bwta.join("b.bwta")).unwrap(), b"b");
    assert_eq!(fs::read(bwta2.join("a.bwta")).unwrap(), b"bwta2");
    assert!(!bwta.join("readme.txt").exists());
    assert!(!bwta2.join("readme.txt").exists());

    // a second run has nothing left to write
    assert_eq!(extract_bwta_caches(&archive, &bwta, &bwta2).unwrap(), 0);
}

#[test]
fn failed_bwta_download_leaves_caches_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = DataDirs::new(tmp.path());
    let (bwta, bwta2) = (dirs.bwta(), dirs.bwta2());
    fs::create_dir_all(&bwta).unwrap();
    fs::create_dir_all(&bwta2).unwrap();
    fs::write(bwta.join("a.bwta"), b"mine").unwrap();

    let res = download_bwta_caches(UNREACHABLE_BWTA_URL, &bwta, &bwta2);

    assert!(matches!(res, Err(ArenaError::Provisioning { .. })));
    let mut left: Vec<_> = fs::read_dir(tmp.path().join("bwapi-data"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    left.sort();
    assert_eq!(left, ["BWTA", "BWTA2"]);
    assert_eq!(fs::read_dir(&bwta2).unwrap().count(), 0);
    assert_eq!(fs::read(bwta.join("a.bwta")).unwrap(), b"mine");
}
