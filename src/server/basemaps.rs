//! Static registry of XYZ basemap providers.
//!
//! The list is built on first access and never changes afterwards.

use std::sync::OnceLock;

use serde::Serialize;

/// A named XYZ tile provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Basemap {
    pub name: &'static str,
    /// URL template with `{z}`, `{x}`, `{y}` (and optionally `{s}`) placeholders
    pub url: &'static str,
    pub attribution: &'static str,
    pub max_zoom: u32,
}

static BASEMAPS: OnceLock<Vec<Basemap>> = OnceLock::new();

/// All registered basemaps.
pub fn basemaps() -> &'static [Basemap] {
    BASEMAPS.get_or_init(|| {
        vec![
            Basemap {
                name: "OpenStreetMap",
                url: "https://tile.openstreetmap.org/{z}/{x}/{y}.png",
                attribution: "&copy; OpenStreetMap contributors",
                max_zoom: 19,
            },
            Basemap {
                name: "CartoDB.Positron",
                url: "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}.png",
                attribution: "&copy; OpenStreetMap contributors &copy; CARTO",
                max_zoom: 20,
            },
            Basemap {
                name: "CartoDB.DarkMatter",
                url: "https://{s}.basemaps.cartocdn.com/dark_all/{z}/{x}/{y}.png",
                attribution: "&copy; OpenStreetMap contributors &copy; CARTO",
                max_zoom: 20,
            },
            Basemap {
                name: "Esri.WorldImagery",
                url: "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}",
                attribution: "Tiles &copy; Esri",
                max_zoom: 19,
            },
            Basemap {
                name: "OpenTopoMap",
                url: "https://{s}.tile.opentopomap.org/{z}/{x}/{y}.png",
                attribution: "&copy; OpenStreetMap contributors, SRTM | &copy; OpenTopoMap (CC-BY-SA)",
                max_zoom: 17,
            },
        ]
    })
}

/// Look up a basemap by name, ignoring case.
pub fn basemap(name: &str) -> Option<&'static Basemap> {
    basemaps().iter().find(|b| b.name.eq_ignore_ascii_case(name))
}
