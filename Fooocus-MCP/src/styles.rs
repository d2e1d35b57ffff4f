//! Built-in Fooocus style names, performance presets and aspect-ratio aliases.

use std::fmt::Write;

/// Style used when a request names none.
pub const DEFAULT_STYLE: &str = "Fooocus V2";

/// Dimensions used when an aspect ratio is missing or unrecognized.
pub const DEFAULT_ASPECT_RATIO: &str = "1152*896";

pub const PERFORMANCE_OPTIONS: &[&str] =
    &["Speed", "Quality", "Extreme Speed", "Lightning", "Hyper-SD"];

/// Alias to `W*H`. Lookup is case-insensitive.
pub const ASPECT_ALIASES: &[(&str, &str)] = &[
    ("square", "1024*1024"),
    ("1:1", "1024*1024"),
    ("portrait", "896*1152"),
    ("3:4", "896*1152"),
    ("landscape", "1152*896"),
    ("4:3", "1152*896"),
    ("wide", "1344*768"),
    ("widescreen", "1344*768"),
    ("16:9", "1344*768"),
    ("tall", "768*1344"),
    ("9:16", "768*1344"),
    ("ultrawide", "1536*640"),
    ("21:9", "1536*640"),
];

pub const STYLE_FAMILIES: &[(&str, &[&str])] = &[
    (
        "Fooocus",
        &[
            "Fooocus V2",
            "Fooocus Enhance",
            "Fooocus Sharp",
            "Fooocus Masterpiece",
            "Fooocus Photograph",
            "Fooocus Negative",
            "Fooocus Cinematic",
            "Fooocus Semi Realistic",
            "Fooocus Pony",
        ],
    ),
    (
        "SAI",
        &[
            "SAI 3D Model",
            "SAI Analog Film",
            "SAI Anime",
            "SAI Cinematic",
            "SAI Comic Book",
            "SAI Craft Clay",
            "SAI Digital Art",
            "SAI Enhance",
            "SAI Fantasy Art",
            "SAI Isometric",
            "SAI Line Art",
            "SAI Lowpoly",
            "SAI Neonpunk",
            "SAI Origami",
            "SAI Photographic",
            "SAI Pixel Art",
            "SAI Texture",
        ],
    ),
    (
        "MRE",
        &[
            "MRE Cinematic Dynamic",
            "MRE Spontaneous Picture",
            "MRE Artistic Vision",
            "MRE Dark Dream",
            "MRE Gloomy Art",
            "MRE Bad Dream",
            "MRE Underground",
            "MRE Surreal Painting",
            "MRE Dynamic Illustration",
            "MRE Undead Art",
            "MRE Elemental Art",
            "MRE Space Art",
            "MRE Ancient Illustration",
            "MRE Brave Art",
            "MRE Heroic Fantasy",
            "MRE Dark Cyberpunk",
            "MRE Lyrical Geometry",
            "MRE Sumi E Symbolic",
            "MRE Sumi E Detailed",
            "MRE Manga",
            "MRE Anime",
            "MRE Comic",
        ],
    ),
    (
        "Ads",
        &[
            "Ads Advertising",
            "Ads Automotive",
            "Ads Corporate",
            "Ads Fashion Editorial",
            "Ads Food Photography",
            "Ads Gourmet Food Photography",
            "Ads Luxury",
            "Ads Real Estate",
            "Ads Retail",
        ],
    ),
    (
        "Artstyle",
        &[
            "Artstyle Abstract",
            "Artstyle Abstract Expressionism",
            "Artstyle Art Deco",
            "Artstyle Art Nouveau",
            "Artstyle Constructivist",
            "Artstyle Cubist",
            "Artstyle Expressionist",
            "Artstyle Graffiti",
            "Artstyle Hyperrealism",
            "Artstyle Impressionist",
            "Artstyle Pointillism",
            "Artstyle Pop Art",
            "Artstyle Psychedelic",
            "Artstyle Renaissance",
            "Artstyle Steampunk",
            "Artstyle Surrealist",
            "Artstyle Typography",
            "Artstyle Watercolor",
        ],
    ),
    (
        "Game",
        &[
            "Game Bubble Bobble",
            "Game Cyberpunk Game",
            "Game Fighting Game",
            "Game Gta",
            "Game Mario",
            "Game Minecraft",
            "Game Pokemon",
            "Game Retro Arcade",
            "Game Retro Game",
            "Game Rpg Fantasy Game",
            "Game Strategy Game",
            "Game Streetfighter",
            "Game Zelda",
        ],
    ),
    (
        "Photo",
        &[
            "Photo Alien",
            "Photo Film Noir",
            "Photo Glamour",
            "Photo Hdr",
            "Photo Iphone Photographic",
            "Photo Long Exposure",
            "Photo Neon Noir",
            "Photo Silhouette",
            "Photo Tilt Shift",
        ],
    ),
];

/// Every known style, in catalogue order.
pub fn all_styles() -> impl Iterator<Item = &'static str> {
    STYLE_FAMILIES.iter().flat_map(|(_, styles)| styles.iter().copied())
}

/// Canonical spelling of a known style, matched case-insensitively.
pub fn canonical_style(name: &str) -> Option<&'static str> {
    let name = name.trim();
    all_styles().find(|s| s.eq_ignore_ascii_case(name))
}

/// Canonical spelling of a performance preset.
pub fn canonical_performance(name: &str) -> Option<&'static str> {
    let name = name.trim();
    PERFORMANCE_OPTIONS
        .iter()
        .copied()
        .find(|p| p.eq_ignore_ascii_case(name))
}

pub fn aspect_alias(name: &str) -> Option<&'static str> {
    let name = name.trim();
    ASPECT_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, dims)| *dims)
}

/// Human-readable catalogue for `list_styles`.
pub fn render_catalogue() -> String {
    let mut out = String::new();
    let total = all_styles().count();
    let _ = writeln!(out, "Available styles ({}):", total);
    for (family, styles) in STYLE_FAMILIES {
        let _ = writeln!(out, "\n{} ({}):", family, styles.len());
        for style in *styles {
            let _ = writeln!(out, "  - {}", style);
        }
    }

    let _ = writeln!(out, "\nPerformance presets: {}", PERFORMANCE_OPTIONS.join(", "));

    let _ = writeln!(out, "\nAspect ratios (or any literal W*H):");
    for (alias, dims) in ASPECT_ALIASES {
        let _ = writeln!(out, "  - {:<10} {}", alias, dims);
    }
    let _ = write!(out, "Default: {}", DEFAULT_ASPECT_RATIO);
    out
}
