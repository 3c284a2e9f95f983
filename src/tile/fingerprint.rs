//! Content fingerprints of tiles.
//!
//! A fingerprint is the hex SHA-256 of a canonical text encoding of
//! everything that influences a tile's bytes:
//!
//! ```text
//! <layer>\n<identifier>\n<z>/<x>/<y>\n<RenderParams::canonical()>
//! ```
//!
//! Two requests with the same fingerprint produce the same bytes, so the
//! fingerprint doubles as cache key and HTTP ETag.

use sha2::{Digest, Sha256};

use crate::render::RenderParams;

/// Fingerprint of tile `(z, x, y)` of `identifier` rendered by `layer`.
pub fn tile_fingerprint(
    layer: &str,
    identifier: &str,
    z: u32,
    x: u32,
    y: u32,
    params: &RenderParams,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(layer.as_bytes());
    hasher.update(b"\n");
    hasher.update(identifier.as_bytes());
    hasher.update(format!("\n{}/{}/{}\n", z, x, y).as_bytes());
    hasher.update(params.canonical().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let params = RenderParams::default();
        let a = tile_fingerprint("raster", "a.tif", 3, 1, 2, &params);
        let b = tile_fingerprint("raster", "a.tif", 3, 1, 2, &params);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = RenderParams::default();
        let reference = tile_fingerprint("raster", "a.tif", 3, 1, 2, &base);

        let others = [
            tile_fingerprint("debug", "a.tif", 3, 1, 2, &base),
            tile_fingerprint("raster", "b.tif", 3, 1, 2, &base),
            tile_fingerprint("raster", "a.tif", 4, 1, 2, &base),
            tile_fingerprint("raster", "a.tif", 3, 2, 1, &base),
            tile_fingerprint(
                "raster",
                "a.tif",
                3,
                1,
                2,
                &RenderParams {
                    vmin: vec![0.0],
                    vmax: vec![100.0],
                    ..base.clone()
                },
            ),
            tile_fingerprint(
                "raster",
                "a.tif",
                3,
                1,
                2,
                &RenderParams {
                    vmin: vec![0.0],
                    vmax: vec![200.0],
                    ..base.clone()
                },
            ),
            tile_fingerprint(
                "raster",
                "a.tif",
                3,
                1,
                2,
                &RenderParams {
                    colormap: Some("viridis".into()),
                    ..base.clone()
                },
            ),
        ];
        for (i, other) in others.iter().enumerate() {
            assert_ne!(other, &reference, "variant {} collides", i);
        }
        assert_ne!(others[4], others[5]);
    }

    #[test]
    fn test_identifier_cannot_shift_into_coordinates() {
        let params = RenderParams::default();
        assert_ne!(
            tile_fingerprint("raster", "a.tif\n1", 2, 3, 4, &params),
            tile_fingerprint("raster", "a.tif", 12, 3, 4, &params),
        );
    }
}
