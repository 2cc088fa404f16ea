//! Shader parameters for the liquid metal effect
//!
//! These values drive the fragment shader uniforms. They are serialized to
//! JSON with the same camelCase names the page markup uses, so presets can
//! be shared between the site and the CLI.

use serde::{Deserialize, Serialize};

/// Light or dark page theme (changes the animation speed of skill icons)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

/// All tunable parameters of the liquid metal shader
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShaderParams {
    /// Stripe repeat frequency
    pub pattern_scale: f32,

    /// Distortion strength
    pub refraction: f32,

    /// Mask sharpness
    /// - Lower values cut the icon edge tighter
    /// - 1.0 = default softness
    pub edge: f32,

    /// Stripe edge softness
    pub pattern_blur: f32,

    /// Noise-driven edge perturbation amount
    pub liquid: f32,

    /// Animation time multiplier (not uploaded, scales the clock)
    pub speed: f32,
}

impl Default for ShaderParams {
    fn default() -> Self {
        Self {
            pattern_scale: 2.0,
            refraction: 0.015,
            edge: 1.0,
            pattern_blur: 0.005,
            liquid: 0.07,
            speed: 0.3,
        }
    }
}

impl ShaderParams {
    /// Tuned for small metallic icons in the skills grid
    pub fn small_icon() -> Self {
        Self {
            pattern_scale: 2.5,
            refraction: 0.018,
            edge: 0.5,
            pattern_blur: 0.003,
            liquid: 0.04,
            speed: 0.15,
        }
    }

    /// Tuned for distance-field skill icons; slower on the light theme
    pub fn skill_icon(theme: Theme) -> Self {
        Self {
            pattern_scale: 3.2,
            refraction: 0.015,
            edge: 1.2,
            pattern_blur: 0.01,
            liquid: 0.05,
            speed: match theme {
                Theme::Light => 0.12,
                Theme::Dark => 0.25,
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
