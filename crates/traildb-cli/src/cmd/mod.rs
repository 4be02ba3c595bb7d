// crates/traildb-cli/src/cmd/mod.rs

pub mod dump;
pub mod inspect;
pub mod make;

use anyhow::{bail, Context};
use traildb_core::Uuid;

/// Parse a hex uuid, right-padding short input with zeros like the
/// classic tooling does.
pub fn parse_uuid(token: &str) -> anyhow::Result<Uuid> {
    if token.len() > 32 || !token.is_ascii() {
        bail!("invalid UUID '{token}'");
    }
    let mut hexuuid = [b'0'; 32];
    hexuuid[..token.len()].copy_from_slice(token.as_bytes());
    let mut uuid = [0u8; 16];
    hex::decode_to_slice(std::str::from_utf8(&hexuuid)?, &mut uuid)
        .with_context(|| format!("invalid UUID '{token}'"))?;
    Ok(uuid)
}

pub fn format_uuid(uuid: &Uuid) -> String {
    hex::encode(uuid)
}
