//! Target devices and their folder/image layout presets

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const IMAGE_TYPE_COVER: &str = "cover";
pub const IMAGE_TYPE_SCREENSHOT: &str = "screenshot";

/// Per-system folder configuration
///
/// Older records store just the folder name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPathConfig {
    Legacy(String),
    Detailed {
        #[serde(default)]
        folder: Option<String>,
        #[serde(default)]
        game_folders: bool,
    },
}

/// A handheld or console that receives ROM bundles
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    /// Root folder inside bundles, e.g. `"Roms/"`
    pub root_path: String,
    #[sqlx(json)]
    pub system_paths: BTreeMap<String, SystemPathConfig>,
    pub include_images: bool,
    /// `cover` or `screenshot`
    pub image_type: String,
    /// Placeholders: `{root_path}`, `{system}`, `{romname}`, `{romname_ext}`
    pub image_path_template: String,
    pub image_max_width: Option<i64>,
    /// Slug of the last applied preset (informational)
    pub applied_preset: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Folder name for a system, falling back to the uppercase slug
    pub fn system_folder(&self, system_slug: &str) -> String {
        match self.system_paths.get(system_slug) {
            Some(SystemPathConfig::Legacy(folder)) => folder.clone(),
            Some(SystemPathConfig::Detailed { folder: Some(folder), .. }) => folder.clone(),
            _ => system_slug.to_uppercase(),
        }
    }

    pub fn use_game_folders(&self, system_slug: &str) -> bool {
        matches!(
            self.system_paths.get(system_slug),
            Some(SystemPathConfig::Detailed { game_folders: true, .. })
        )
    }

    /// Path of a ROM inside a bundle: `Roms/GBA/[Game Name/]file.gba`
    pub fn rom_path(&self, system_slug: &str, game_folder: &str, filename: &str) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(4);
        let root = self.root_path.trim_matches('/');
        if !root.is_empty() {
            parts.push(root.to_string());
        }
        parts.push(self.system_folder(system_slug));
        if self.use_game_folders(system_slug) {
            parts.push(game_folder.to_string());
        }
        parts.push(filename.to_string());
        parts.join("/")
    }

    /// Path of a ROM's image inside a bundle, when images are enabled
    pub fn image_path(&self, system_slug: &str, rom_filename: &str) -> Option<String> {
        if !self.include_images || self.image_path_template.is_empty() {
            return None;
        }

        let romname = Path::new(rom_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| rom_filename.to_string());

        Some(
            self.image_path_template
                .replace("{root_path}", self.root_path.trim_matches('/'))
                .replace("{system}", &self.system_folder(system_slug))
                .replace("{romname_ext}", rom_filename)
                .replace("{romname}", &romname),
        )
    }

    /// Copy a preset's folder and image settings onto this device
    pub fn apply_preset(&mut self, preset: &DevicePreset) {
        if let Some(folders) = &preset.folders {
            if let Some(root) = &folders.root_path {
                self.root_path = root.clone();
            }
            for (slug, config) in &folders.system_paths {
                self.system_paths.insert(slug.clone(), config.clone());
            }
        }

        if let Some(images) = &preset.images {
            self.include_images = true;
            if let Some(template) = &images.path_template {
                self.image_path_template = template.clone();
            }
            if images.max_width.is_some() {
                self.image_max_width = images.max_width;
            }
            if let Some(image_type) = &images.image_type {
                self.image_type = image_type.clone();
            }
        }

        self.applied_preset = preset.slug.clone();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetFolders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_path: Option<String>,
    #[serde(default)]
    pub system_paths: BTreeMap<String, SystemPathConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetImages {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
}

/// Reusable device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePreset {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_builtin: bool,
    #[serde(default)]
    pub folders: Option<PresetFolders>,
    #[serde(default)]
    pub images: Option<PresetImages>,
}

/// Fields accepted when creating or replacing a device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInput {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_root_path")]
    pub root_path: String,
    #[serde(default)]
    pub system_paths: BTreeMap<String, SystemPathConfig>,
    #[serde(default)]
    pub include_images: bool,
    #[serde(default = "default_image_type")]
    pub image_type: String,
    #[serde(default)]
    pub image_path_template: String,
    #[serde(default)]
    pub image_max_width: Option<i64>,
}

fn default_root_path() -> String {
    "Roms/".to_string()
}

fn default_image_type() -> String {
    IMAGE_TYPE_COVER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        let now = Utc::now();
        Device {
            id: 1,
            name: "Handheld".into(),
            slug: "handheld".into(),
            description: String::new(),
            root_path: "/Roms/".into(),
            system_paths: BTreeMap::new(),
            include_images: false,
            image_type: IMAGE_TYPE_COVER.into(),
            image_path_template: String::new(),
            image_max_width: None,
            applied_preset: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_system_folder_fallbacks() {
        let mut d = device();
        d.system_paths.insert("gb".into(), SystemPathConfig::Legacy("GameBoy".into()));
        d.system_paths.insert(
            "psx".into(),
            SystemPathConfig::Detailed { folder: Some("PS".into()), game_folders: true },
        );
        d.system_paths.insert(
            "nes".into(),
            SystemPathConfig::Detailed { folder: None, game_folders: false },
        );

        assert_eq!(d.system_folder("gb"), "GameBoy");
        assert_eq!(d.system_folder("psx"), "PS");
        assert_eq!(d.system_folder("nes"), "NES");
        assert_eq!(d.system_folder("gba"), "GBA");
        assert!(!d.use_game_folders("gb"));
        assert!(d.use_game_folders("psx"));
    }

    #[test]
    fn test_rom_path() {
        let mut d = device();
        assert_eq!(d.rom_path("gba", "Zelda", "zelda.gba"), "Roms/GBA/zelda.gba");

        d.system_paths.insert(
            "psx".into(),
            SystemPathConfig::Detailed { folder: Some("PS".into()), game_folders: true },
        );
        assert_eq!(d.rom_path("psx", "FF7", "ff7.chd"), "Roms/PS/FF7/ff7.chd");

        d.root_path = "/".into();
        assert_eq!(d.rom_path("gba", "Zelda", "zelda.gba"), "GBA/zelda.gba");
    }

    #[test]
    fn test_image_path_template() {
        let mut d = device();
        d.image_path_template = "{root_path}/{system}/Imgs/{romname}.png".into();
        assert_eq!(d.image_path("gba", "zelda.gba"), None);

        d.include_images = true;
        assert_eq!(
            d.image_path("gba", "zelda.gba").as_deref(),
            Some("Roms/GBA/Imgs/zelda.png")
        );

        d.image_path_template = "{system}/.media/{romname_ext}.png".into();
        assert_eq!(
            d.image_path("gba", "zelda.gba").as_deref(),
            Some("GBA/.media/zelda.gba.png")
        );
    }

    #[test]
    fn test_system_path_config_json_forms() {
        let parsed: BTreeMap<String, SystemPathConfig> =
            serde_json::from_str(r#"{"gb": "GB", "ps1": {"folder": "PS", "game_folders": true}}"#)
                .unwrap();
        assert_eq!(parsed["gb"], SystemPathConfig::Legacy("GB".into()));
        assert_eq!(
            parsed["ps1"],
            SystemPathConfig::Detailed { folder: Some("PS".into()), game_folders: true }
        );
    }

    #[test]
    fn test_apply_preset_merges_and_records() {
        let mut d = device();
        d.system_paths.insert("gb".into(), SystemPathConfig::Legacy("Old".into()));
        d.system_paths.insert("nes".into(), SystemPathConfig::Legacy("FC".into()));

        let mut system_paths = BTreeMap::new();
        system_paths.insert("gb".into(), SystemPathConfig::Legacy("GB".into()));
        let preset = DevicePreset {
            slug: "minui".into(),
            name: "MinUI".into(),
            description: String::new(),
            tags: vec![],
            is_builtin: true,
            folders: Some(PresetFolders { root_path: Some("Roms/".into()), system_paths }),
            images: Some(PresetImages {
                path_template: Some("{root_path}/{system}/.res/{romname_ext}.png".into()),
                max_width: Some(320),
                image_type: None,
            }),
        };

        d.apply_preset(&preset);
        assert_eq!(d.root_path, "Roms/");
        assert_eq!(d.system_folder("gb"), "GB");
        assert_eq!(d.system_folder("nes"), "FC");
        assert!(d.include_images);
        assert_eq!(d.image_max_width, Some(320));
        assert_eq!(d.image_type, IMAGE_TYPE_COVER);
        assert_eq!(d.applied_preset, "minui");
    }
}
