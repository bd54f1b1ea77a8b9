//! Makes sure the container runtime is usable before any match is launched.
//!
//! Everything here is idempotent: calling it on an already provisioned machine only issues
//! read-only queries.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    configuration::{DataDirs, DEFAULT_NETWORK, DEFAULT_SUBNET_CIDR},
    error::ArenaError,
    runtime::ContainerRuntime,
};

pub const PARENT_IMAGE: &str = "ggaic/starcraft:java-1.0.4";
pub const JAVA_IMAGE: &str = "starcraft:java";
pub const GAME_PAYLOAD_URL: &str = "http://files.theabyss.ru/sc/starcraft.zip";
pub const GAME_DOCKERFILE: &str = "game.dockerfile";
const PAYLOAD_FILE: &str = "starcraft.zip";

/// Precomputed BWTA and BWTA2 map analyses, laid out as `bwapi-data/BWTA*/<file>`.
pub const BWTA_CACHE_URL: &str =
    "https://github.com/adakitesystems/DropLauncher/releases/download/0.4.18a/BWTA_cache.zip";
const BWTA_CACHE_ARCHIVE: &str = "BWTA_cache.zip";

/// How to obtain the game image when it is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    /// Tag the matches run with.
    pub local_tag: String,
    /// Published image holding the OS, java and BWAPI layers.
    pub parent_tag: String,
    /// Local alias of the parent, referenced by the build context.
    pub java_tag: String,
    /// Game binaries, too large to be published in an image.
    pub payload_url: String,
    /// Build context; the payload is cached there.
    pub install_dir: PathBuf,
}

impl ImageSpec {
    /// Default images, built in `<base>/docker`.
    pub fn new(local_tag: impl Into<String>, dirs: &DataDirs) -> Self {
        ImageSpec {
            local_tag: local_tag.into(),
            parent_tag: PARENT_IMAGE.to_string(),
            java_tag: JAVA_IMAGE.to_string(),
            payload_url: GAME_PAYLOAD_URL.to_string(),
            install_dir: dirs.docker(),
        }
    }

    pub fn payload_path(&self) -> PathBuf {
        self.install_dir.join(PAYLOAD_FILE)
    }

    fn default_dockerfile(&self) -> String {
        format!(
            "FROM {java}\n\
             COPY {payload} /tmp/{payload}\n\
             RUN unzip -q /tmp/{payload} -d /app/sc && rm /tmp/{payload}\n",
            java = self.java_tag,
            payload = PAYLOAD_FILE,
        )
    }
}

pub struct Provisioner<'r> {
    runtime: &'r dyn ContainerRuntime,
}

impl<'r> Provisioner<'r> {
    pub fn new(runtime: &'r dyn ContainerRuntime) -> Self {
        Provisioner { runtime }
    }

    /// Query the runtime version and run a trivial workload.
    #[instrument(skip(self))]
    pub fn ensure_runtime_reachable(&self) -> Result<(), ArenaError> {
        info!("checking docker can run");
        let version = self
            .runtime
            .version()
            .map_err(|e| ArenaError::provisioning_with("container runtime is unreachable", e))?;
        self.runtime
            .run_liveness_probe()
            .map_err(|e| ArenaError::provisioning_with("container runtime cannot run workloads", e))?;
        debug!(%version, "using docker API version");
        Ok(())
    }

    /// Return the id of network `name`, creating it with `subnet_cidr` if it does not exist.
    #[instrument(skip(self))]
    pub fn ensure_network(&self, name: &str, subnet_cidr: &str) -> Result<String, ArenaError> {
        info!("checking whether docker has network {name}");
        let existing = self
            .runtime
            .list_networks(name)
            .map_err(|e| ArenaError::provisioning_with("could not list networks", e))?;

        let id = match existing.into_iter().next() {
            Some(network) => network.id,
            None => {
                info!("network not found, creating ...");
                self.runtime
                    .create_network(name, subnet_cidr)
                    .map_err(|e| ArenaError::provisioning_with(format!("could not create network {name}"), e))?
            }
        };
        debug!(%id, "docker network id");
        Ok(id)
    }

    /// Make sure `image.local_tag` exists, building it otherwise.
    ///
    /// Building downloads the game payload unless it is already cached in the build context,
    /// pulls the parent image, aliases it and builds the local image.
    #[instrument(skip_all, fields(image = %image.local_tag))]
    pub fn ensure_image(&self, image: &ImageSpec) -> Result<(), ArenaError> {
        info!("checking if there is local image {}", image.local_tag);
        let present = self
            .runtime
            .image_exists(&image.local_tag)
            .map_err(|e| ArenaError::provisioning_with("could not list images", e))?;
        if present {
            info!("image {} found locally.", image.local_tag);
            return Ok(());
        }

        info!("image not found locally, creating...");
        let context = &image.install_dir;
        fs::create_dir_all(context).map_err(|e| ArenaError::filesystem(context, e))?;

        let dockerfile = context.join(GAME_DOCKERFILE);
        if !dockerfile.exists() {
            fs::write(&dockerfile, image.default_dockerfile())
                .map_err(|e| ArenaError::filesystem(&dockerfile, e))?;
        }

        let payload = image.payload_path();
        if !payload.exists() {
            info!("downloading {} to {payload:?}", image.payload_url);
            download_file(&image.payload_url, &payload)?;
        }

        info!("pulling image {}, this may take a while...", image.parent_tag);
        self.runtime
            .pull_image(&image.parent_tag)
            .map_err(|e| ArenaError::provisioning_with(format!("could not pull {}", image.parent_tag), e))?;
        self.runtime
            .tag_image(&image.parent_tag, &image.java_tag)
            .map_err(|e| ArenaError::provisioning_with(format!("could not tag {}", image.java_tag), e))?;

        info!("building local image {}, this may take a while...", image.local_tag);
        self.runtime
            .build_image(context, GAME_DOCKERFILE, &image.local_tag)
            .map_err(|e| ArenaError::provisioning_with(format!("could not build {}", image.local_tag), e))?;
        info!("successfully built image {}", image.local_tag);
        Ok(())
    }

    /// Remove `tag` if present. Failures are only logged.
    pub fn remove_image(&self, tag: &str) {
        match self.runtime.image_exists(tag) {
            Ok(false) => {}
            Ok(true) => match self.runtime.remove_image(tag) {
                Ok(()) => info!("docker image {tag} removed."),
                Err(e) => warn!("could not remove image {tag}: {e}"),
            },
            Err(e) => warn!("there occurred an error trying to find image {tag}: {e}"),
        }
    }
}

/// Download `url` into `dest`.
///
/// The body is streamed into `<dest>.part`, renamed only once complete, so an interrupted
/// download is never mistaken for a cached payload.
pub fn download_file(url: &str, dest: &Path) -> Result<(), ArenaError> {
    let partial = PathBuf::from(format!("{}.part", dest.display()));

    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("sc-arena/", env!("CARGO_PKG_VERSION")))
        .timeout(None::<std::time::Duration>)
        .build()
        .map_err(|e| ArenaError::provisioning_with("could not create http client", e))?;
    let mut response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| ArenaError::provisioning_with(format!("could not download {url}"), e))?;

    let mut file = File::create(&partial).map_err(|e| ArenaError::filesystem(&partial, e))?;
    let copied = response.copy_to(&mut file);
    drop(file);
    match copied {
        Ok(bytes) => debug!(bytes, "download finished"),
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(ArenaError::provisioning_with(
                format!("download of {url} interrupted"),
                e,
            ));
        }
    }

    fs::rename(&partial, dest).map_err(|e| ArenaError::filesystem(dest, e))
}

/// Full first-time setup: runtime check, network, fresh game image, data directories and
/// BWTA caches.
///
/// An existing image with the same tag is removed first so that updates are picked up. The
/// caches only save the game some map analysis, failing to fetch them is not fatal.
#[instrument(skip_all)]
pub fn install(
    runtime: &dyn ContainerRuntime,
    dirs: &DataDirs,
    image: &ImageSpec,
    bwta_cache_url: &str,
) -> Result<(), ArenaError> {
    if dirs.base.exists() {
        warn!("Path {:?} found, re-installing.", dirs.base);
        warn!("Re-creating the base game image...");
    }

    let provisioner = Provisioner::new(runtime);
    provisioner.ensure_runtime_reachable()?;
    provisioner.ensure_network(DEFAULT_NETWORK, DEFAULT_SUBNET_CIDR)?;
    provisioner.remove_image(&image.local_tag);
    provisioner.ensure_image(image)?;

    for dir in dirs.all() {
        fs::create_dir_all(&dir).map_err(|e| ArenaError::filesystem(&dir, e))?;
    }

    if let Err(e) = download_bwta_caches(bwta_cache_url, &dirs.bwta(), &dirs.bwta2()) {
        warn!("could not install BWTA caches, maps will be analysed on first play: {e}");
    }

    info!("Install finished. Data files are located in {:?}", dirs.base);
    Ok(())
}

/// Download the BWTA cache archive next to `bwta_dir` and extract it with
/// [`extract_bwta_caches`]. The archive is removed afterwards.
#[instrument(skip(bwta_dir, bwta2_dir))]
pub fn download_bwta_caches(url: &str, bwta_dir: &Path, bwta2_dir: &Path) -> Result<usize, ArenaError> {
    info!("downloading BWTA caches");
    let archive = bwta_dir.with_file_name(BWTA_CACHE_ARCHIVE);
    download_file(url, &archive)?;
    let extracted = extract_bwta_caches(&archive, bwta_dir, bwta2_dir);
    if let Err(e) = fs::remove_file(&archive) {
        warn!("could not remove {archive:?}: {e}");
    }
    extracted
}

/// Copy the `bwapi-data/BWTA/` and `bwapi-data/BWTA2/` entries of `archive` into `bwta_dir`
/// and `bwta2_dir`. Files already present are left untouched.
///
/// Returns the number of files written.
pub fn extract_bwta_caches(archive: &Path, bwta_dir: &Path, bwta2_dir: &Path) -> Result<usize, ArenaError> {
    let file = File::open(archive).map_err(|e| ArenaError::filesystem(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| ArenaError::provisioning_with(format!("{archive:?} is not a zip archive"), e))?;

    let mut written = 0;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| ArenaError::provisioning_with(format!("could not read {archive:?}"), e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry.enclosed_name() else {
            warn!(name = entry.name(), "skipping unsafe archive entry");
            continue;
        };
        let dest = if let Ok(rest) = path.strip_prefix("bwapi-data/BWTA2") {
            bwta2_dir.join(rest)
        } else if let Ok(rest) = path.strip_prefix("bwapi-data/BWTA") {
            bwta_dir.join(rest)
        } else {
            continue;
        };
        if dest.exists() {
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ArenaError::filesystem(parent, e))?;
        }
        let partial = PathBuf::from(format!("{}.part", dest.display()));
        let mut out = File::create(&partial).map_err(|e| ArenaError::filesystem(&partial, e))?;
        let copied = io::copy(&mut entry, &mut out);
        drop(out);
        if let Err(e) = copied {
            let _ = fs::remove_file(&partial);
            return Err(ArenaError::filesystem(&dest, e));
        }
        fs::rename(&partial, &dest).map_err(|e| ArenaError::filesystem(&dest, e))?;
        written += 1;
    }
    debug!(written, "BWTA caches extracted");
    Ok(written)
}

/// True when the game image `tag` is already available. An unreachable runtime counts as
/// not installed.
pub fn is_installed(runtime: &dyn ContainerRuntime, tag: &str) -> bool {
    runtime.image_exists(tag).unwrap_or(false)
}

