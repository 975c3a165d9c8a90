//! Printer type templates.
//!
//! A [`PrinterType`] describes a hardware model: which colours it carries,
//! how much paper it holds and how fast it prints. Types are immutable; they
//! seed new instances and classify capabilities, nothing more.

use crate::ink::InkColor;
use crate::types::PrinterTypeId;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// How the printer stores its ink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InkSystem {
    /// Replaceable inkjet cartridges
    Cartridge,
    /// Refillable ink tanks
    Tank,
    /// Laser toner
    Toner,
}

impl InkSystem {
    /// Whether the device has inkjet print heads that can be cleaned.
    #[must_use]
    pub const fn has_print_heads(self) -> bool {
        matches!(self, Self::Cartridge | Self::Tank)
    }
}

/// Paper sizes a tray can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSize {
    /// ISO A4
    A4,
    /// ISO A5
    A5,
    /// US Letter
    Letter,
    /// US Legal
    Legal,
    /// 4x6 inch photo paper
    #[serde(rename = "photo_4x6")]
    Photo4x6,
}

impl std::fmt::Display for PaperSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::A4 => "a4",
            Self::A5 => "a5",
            Self::Letter => "letter",
            Self::Legal => "legal",
            Self::Photo4x6 => "photo_4x6",
        };
        f.write_str(name)
    }
}

/// Optional hardware features.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    /// Two-sided printing
    pub duplex: bool,
    /// Wi-Fi connectivity
    pub wireless: bool,
    /// Flatbed scanner
    pub scanner: bool,
    /// Photo-quality printing
    pub photo: bool,
}

/// Immutable hardware template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrinterType {
    /// Template identifier
    pub id: PrinterTypeId,
    /// Manufacturer
    pub brand: String,
    /// Model name
    pub model: String,
    /// Ink storage kind
    pub ink_system: InkSystem,
    /// Colours carried
    pub colors: Vec<InkColor>,
    /// Sheets the input tray holds
    pub paper_capacity: u32,
    /// Pages per minute, monochrome
    pub ppm_mono: u32,
    /// Pages per minute, colour (0 for mono devices)
    pub ppm_color: u32,
    /// Paper sizes the tray accepts
    pub paper_sizes: Vec<PaperSize>,
    /// Feature flags
    #[serde(default)]
    pub features: Features,
}

impl PrinterType {
    /// Whether the device can print in colour.
    #[must_use]
    pub fn is_color(&self) -> bool {
        self.ppm_color > 0
            && [InkColor::Cyan, InkColor::Magenta, InkColor::Yellow]
                .iter()
                .all(|c| self.colors.contains(c))
    }

    /// Whether the tray accepts the given size.
    #[must_use]
    pub fn supports_size(&self, size: PaperSize) -> bool {
        self.paper_sizes.contains(&size)
    }

    /// Print speed for a mono or colour job, in pages per minute.
    #[must_use]
    pub fn ppm(&self, color: bool) -> u32 {
        if color && self.ppm_color > 0 {
            self.ppm_color
        } else {
            self.ppm_mono.max(1)
        }
    }

    /// Display name, e.g. `Brother HL-L2350DW`.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.brand, self.model)
    }

    /// Checks a custom template for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("type id cannot be empty".to_string());
        }
        if self.colors.is_empty() {
            return Err("a printer type needs at least one colour".to_string());
        }
        if self.paper_capacity == 0 {
            return Err("paper capacity must be positive".to_string());
        }
        if self.ppm_mono == 0 {
            return Err("mono speed must be positive".to_string());
        }
        if self.paper_sizes.is_empty() {
            return Err("a printer type needs at least one paper size".to_string());
        }
        Ok(())
    }
}

static BUILTIN_TYPES: LazyLock<Vec<PrinterType>> = LazyLock::new(|| {
    let cmyk = InkColor::ALL.to_vec();
    vec![
        PrinterType {
            id: PrinterTypeId::new("inkjet-home"),
            brand: "Canon".to_string(),
            model: "PIXMA TS6420".to_string(),
            ink_system: InkSystem::Cartridge,
            colors: cmyk.clone(),
            paper_capacity: 100,
            ppm_mono: 15,
            ppm_color: 10,
            paper_sizes: vec![
                PaperSize::A4,
                PaperSize::A5,
                PaperSize::Letter,
                PaperSize::Photo4x6,
            ],
            features: Features {
                duplex: true,
                wireless: true,
                scanner: true,
                photo: true,
            },
        },
        PrinterType {
            id: PrinterTypeId::new("ecotank-office"),
            brand: "Epson".to_string(),
            model: "EcoTank ET-4850".to_string(),
            ink_system: InkSystem::Tank,
            colors: cmyk.clone(),
            paper_capacity: 250,
            ppm_mono: 15,
            ppm_color: 8,
            paper_sizes: vec![PaperSize::A4, PaperSize::Letter, PaperSize::Legal],
            features: Features {
                duplex: true,
                wireless: true,
                scanner: true,
                photo: false,
            },
        },
        PrinterType {
            id: PrinterTypeId::new("laser-mono"),
            brand: "Brother".to_string(),
            model: "HL-L2350DW".to_string(),
            ink_system: InkSystem::Toner,
            colors: vec![InkColor::Black],
            paper_capacity: 250,
            ppm_mono: 32,
            ppm_color: 0,
            paper_sizes: vec![PaperSize::A4, PaperSize::A5, PaperSize::Letter, PaperSize::Legal],
            features: Features {
                duplex: true,
                wireless: true,
                scanner: false,
                photo: false,
            },
        },
        PrinterType {
            id: PrinterTypeId::new("laser-color"),
            brand: "HP".to_string(),
            model: "Color LaserJet Pro M255dw".to_string(),
            ink_system: InkSystem::Toner,
            colors: cmyk,
            paper_capacity: 250,
            ppm_mono: 22,
            ppm_color: 22,
            paper_sizes: vec![PaperSize::A4, PaperSize::Letter, PaperSize::Legal],
            features: Features {
                duplex: true,
                wireless: true,
                scanner: false,
                photo: false,
            },
        },
    ]
});

/// Templates shipped with the simulator.
#[must_use]
pub fn builtin_types() -> &'static [PrinterType] {
    &BUILTIN_TYPES
}

/// Looks up a shipped template by id.
#[must_use]
pub fn builtin_type(id: &str) -> Option<PrinterType> {
    BUILTIN_TYPES.iter().find(|t| t.id.as_str() == id).cloned()
}
