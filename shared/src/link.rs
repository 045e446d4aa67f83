//! CoRE link-format object lists
//!
//! Registration payloads advertise the device's object instances as
//! `</3/6>,</1/0>`. Link attributes (`;rt="oma.lwm2m"`) are accepted and
//! ignored; the root link `</>` is skipped.

use crate::error::Error;
use crate::path::ResourcePath;

/// Render an object list as link format
pub fn encode(paths: &[ResourcePath]) -> String {
    paths
        .iter()
        .map(|path| format!("<{}>", path))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a link-format object list
pub fn parse(payload: &str) -> Result<Vec<ResourcePath>, Error> {
    let mut paths = Vec::new();

    for link in payload.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        let target = link.split(';').next().unwrap_or_default().trim();
        let inner = target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .ok_or_else(|| Error::BadRequest(format!("malformed link: {link}")))?;

        if inner == "/" {
            continue;
        }
        let path = inner
            .parse::<ResourcePath>()
            .map_err(|_| Error::BadRequest(format!("malformed link target: {inner}")))?;
        paths.push(path);
    }

    Ok(paths)
}
