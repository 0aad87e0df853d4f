//! Mod descriptor retrieval and decoding.
//!
//! A descriptor may arrive as raw JSON, sit inside an archive as
//! `dvmod.json`, or not exist at all; in that last case a best-effort one is
//! synthesized whose sole asset self-references the bundle's archive root.

use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::merge;
use crate::model::{BUNDLE_DESCRIPTOR, Mod, ModAsset, ModData, ModVersion, Processor};
use crate::services::Services;
use crate::tree::FileTree;

/// Canonical-origin hops tolerated before assuming a descriptor cycle.
const MAX_ORIGIN_REDIRECTS: u32 = 8;

/// Fetch and decode the mod behind `uri`.
///
/// When the decoded descriptor names a different canonical origin, the mod is
/// re-fetched from there; a descriptor with no origin of its own adopts the
/// fetch URI.
pub fn fetch_mod(services: &Services, uri: &Url) -> Result<Mod> {
    fetch_mod_inner(services, uri, 0)
}

fn fetch_mod_inner(services: &Services, uri: &Url, redirects: u32) -> Result<Mod> {
    if redirects >= MAX_ORIGIN_REDIRECTS {
        return Err(Error::invalid(format!(
            "descriptor origin redirection for '{uri}' did not settle after {MAX_ORIGIN_REDIRECTS} hops"
        )));
    }
    debug!(%uri, "fetching mod descriptor");
    let bytes = services.fetch.fetch(uri)?;
    let (mut data, bundled) = load_data(services, &bytes)?;

    match &data.origin {
        None => data.origin = Some(uri.clone()),
        Some(origin) if origin != uri => {
            let origin = origin.clone();
            info!(requested = %uri, canonical = %origin, "descriptor names another origin, refetching");
            return fetch_mod_inner(services, &origin, redirects + 1);
        }
        Some(_) => {}
    }

    let mut entry = Mod::new(data);
    entry.bundled = bundled;
    Ok(entry)
}

/// Decode descriptor bytes: JSON first, then archive forms.
fn load_data(services: &Services, bytes: &[u8]) -> Result<(ModData, Option<FileTree>)> {
    match serde_json::from_slice::<ModData>(bytes) {
        Ok(data) => {
            data.validate()?;
            return Ok((data, None));
        }
        Err(err) => debug!(error = %err, "descriptor is not raw JSON, trying archive forms"),
    }

    let mut extracted = services.extract.read(bytes, None)?;
    let root = extracted.root;
    merge::load_bundle(&mut extracted.tree, root, services)?;

    if let Some(descriptor) = extracted.tree.get_file(root, BUNDLE_DESCRIPTOR) {
        let data: ModData = serde_json::from_slice(&extracted.tree.read_file(descriptor)?)?;
        data.validate()?;
        return Ok((data, Some(extracted.tree)));
    }

    info!("bundle carries no descriptor, synthesizing one");
    Ok((guess_mod_data(), Some(extracted.tree)))
}

/// A placeholder descriptor for a bare bundle: one version whose sole asset
/// is the bundle's own archive root.
fn guess_mod_data() -> ModData {
    let origin = Url::parse("dvmod://current-archive/").expect("static self-reference URI");
    ModData {
        name: "Unknown Mod".to_owned(),
        description: None,
        author: Some("Unknown Author".to_owned()),
        origin: None,
        versions: vec![ModVersion {
            name: "current".to_owned(),
            assets: vec![ModAsset {
                path: String::new(),
                origin,
                processor: Processor::None,
                archive_path: None,
            }],
            ..Default::default()
        }],
    }
}
