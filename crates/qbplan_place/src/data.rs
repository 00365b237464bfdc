//! Geometry model: modules, pins, I/O pads, nets, and the design that owns them.
//!
//! A [`Design`] is the in-memory record set handed over by an external
//! parser. Module ids are dense and assigned by [`Design::add_module`];
//! [`Design::validate`] rejects ill-formed geometry before any placement
//! work starts.

use crate::error::{PlaceError, PlaceResult};
use qbplan_common::{ModuleId, NetId, Rect};
use qbplan_diagnostics::ModuleNames;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Largest accepted module or outline dimension, keeping every packed
/// coordinate far from `i64` overflow.
pub const MAX_DIMENSION: i64 = 1 << 30;

/// A connection point on a module, positioned relative to the module origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    /// The module that owns this pin.
    pub module: ModuleId,
    /// The net this pin belongs to.
    pub net: NetId,
    /// Offset from the module's lower-left corner, unrotated.
    pub x: i64,
    /// Offset from the module's lower-left corner, unrotated.
    pub y: i64,
}

/// A movable rectangular circuit block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Dense id, assigned when the module is added to a [`Design`].
    pub id: ModuleId,
    /// Name from the input description.
    pub name: String,
    /// Unrotated width.
    pub width: i64,
    /// Unrotated height.
    pub height: i64,
    /// Silicon area, normally `width * height`.
    pub area: i64,
    /// Pins, positioned relative to the module origin.
    pub pins: Vec<Pin>,
}

impl Module {
    /// Creates a module with area `width * height` and no pins.
    pub fn new(name: impl Into<String>, width: i64, height: i64) -> Self {
        Self {
            id: ModuleId::from_raw(0),
            name: name.into(),
            width,
            height,
            area: width.saturating_mul(height),
            pins: Vec::new(),
        }
    }

    /// Adds a pin on `net` at the given offset.
    pub fn with_pin(mut self, net: NetId, x: i64, y: i64) -> Self {
        self.pins.push(Pin {
            module: self.id,
            net,
            x,
            y,
        });
        self
    }
}

/// A fixed I/O pad on the chip outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoPad {
    /// The net this pad drives or receives.
    pub net: NetId,
    /// Position within the root outline.
    pub x: i64,
    /// Position within the root outline.
    pub y: i64,
}

/// The enclosing module carrying I/O pads and its nominal outline.
///
/// Pad coordinates are expressed in the outline's units and scaled to the
/// root cell when computing wirelength.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RootModule {
    /// Nominal outline width; zero disables pad scaling.
    pub width: i64,
    /// Nominal outline height; zero disables pad scaling.
    pub height: i64,
    /// I/O pads.
    pub pads: Vec<IoPad>,
}

/// One endpoint of a net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    /// The `pin`-th pin of `module`.
    Pin {
        /// Owning module.
        module: ModuleId,
        /// Index into the module's pin list.
        pin: usize,
    },
    /// The n-th pad of the root module.
    Pad(usize),
}

/// All terminals sharing a net id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    /// The shared identifier.
    pub id: NetId,
    /// Pins and pads on this net.
    pub terminals: Vec<Terminal>,
}

/// The complete floorplanning input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Design {
    /// Movable modules, indexed by id.
    pub modules: Vec<Module>,
    /// The enclosing module with I/O pads.
    pub root: RootModule,
    /// Fixed pre-placed rectangles that drive the quad-tree partition.
    pub preplaced: Vec<Rect>,
    /// Name lookup (rebuilt on deserialization).
    #[serde(skip)]
    pub module_by_name: HashMap<String, ModuleId>,
}

impl Design {
    /// Creates an empty design around the given root module.
    pub fn new(root: RootModule) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    /// Adds a module, assigns its id, and returns the id.
    pub fn add_module(&mut self, mut module: Module) -> ModuleId {
        let id = ModuleId::from_raw(self.modules.len() as u32);
        module.id = id;
        for pin in &mut module.pins {
            pin.module = id;
        }
        self.module_by_name.insert(module.name.clone(), id);
        self.modules.push(module);
        id
    }

    /// Adds a fixed pre-placed rectangle.
    pub fn add_preplaced(&mut self, rect: Rect) {
        self.preplaced.push(rect);
    }

    /// Returns a reference to the module with the given ID.
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    /// Looks up a module by name.
    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.module_by_name.get(name).copied()
    }

    /// Returns the number of movable modules.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if `id` names a module of this design.
    pub fn contains(&self, id: ModuleId) -> bool {
        id.index() < self.modules.len()
    }

    /// Rebuilds the name index after deserialization.
    pub fn rebuild_indices(&mut self) {
        self.module_by_name = self
            .modules
            .iter()
            .map(|m| (m.name.clone(), m.id))
            .collect();
    }

    /// Sum of module areas plus pre-placed rectangle areas.
    pub fn total_area(&self) -> f64 {
        let modules: f64 = self.modules.iter().map(|m| m.area as f64).sum();
        let fixed: f64 = self.preplaced.iter().map(Rect::area).sum();
        modules + fixed
    }

    /// Widest and tallest module dimensions.
    pub fn max_extent(&self) -> (i64, i64) {
        self.modules.iter().fold((0, 0), |(w, h), m| {
            (w.max(m.width), h.max(m.height))
        })
    }

    /// Groups every pin and pad by net id, in ascending net order.
    pub fn nets(&self) -> Vec<Net> {
        let mut by_net: BTreeMap<NetId, Vec<Terminal>> = BTreeMap::new();
        for module in &self.modules {
            for (pin, p) in module.pins.iter().enumerate() {
                by_net.entry(p.net).or_default().push(Terminal::Pin {
                    module: module.id,
                    pin,
                });
            }
        }
        for (i, pad) in self.root.pads.iter().enumerate() {
            by_net.entry(pad.net).or_default().push(Terminal::Pad(i));
        }
        by_net
            .into_iter()
            .map(|(id, terminals)| Net { id, terminals })
            .collect()
    }

    /// Rejects ill-formed geometry and inconsistent ids.
    pub fn validate(&self) -> PlaceResult<()> {
        let dimension = |what: String, v: i64| -> PlaceResult<()> {
            if v <= 0 || v > MAX_DIMENSION {
                Err(PlaceError::malformed(format!(
                    "{what} must be in 1..={MAX_DIMENSION}, got {v}"
                )))
            } else {
                Ok(())
            }
        };

        for (i, module) in self.modules.iter().enumerate() {
            if module.id.index() != i {
                return Err(PlaceError::malformed(format!(
                    "module '{}' has id m{} at position {i}",
                    module.name, module.id
                )));
            }
            dimension(format!("width of '{}'", module.name), module.width)?;
            dimension(format!("height of '{}'", module.name), module.height)?;
            if module.area <= 0 {
                return Err(PlaceError::malformed(format!(
                    "area of '{}' must be positive",
                    module.name
                )));
            }
            for pin in &module.pins {
                if pin.module != module.id {
                    return Err(PlaceError::malformed(format!(
                        "pin on net {} of '{}' claims owner m{}",
                        pin.net, module.name, pin.module
                    )));
                }
                if !(0..=module.width).contains(&pin.x) || !(0..=module.height).contains(&pin.y) {
                    return Err(PlaceError::malformed(format!(
                        "pin on net {} lies outside '{}'",
                        pin.net, module.name
                    )));
                }
            }
        }

        if self.root.width < 0 || self.root.height < 0 {
            return Err(PlaceError::malformed("root outline must not be negative"));
        }
        for rect in &self.preplaced {
            if rect.left < 0 || rect.bottom < 0 || rect.width() <= 0 || rect.height() <= 0 {
                return Err(PlaceError::malformed(format!(
                    "pre-placed rectangle {rect} must have positive size at non-negative coordinates"
                )));
            }
            if rect.right > MAX_DIMENSION || rect.top > MAX_DIMENSION {
                return Err(PlaceError::malformed(format!(
                    "pre-placed rectangle {rect} exceeds {MAX_DIMENSION}"
                )));
            }
        }
        Ok(())
    }
}

impl ModuleNames for Design {
    fn module_name(&self, module: ModuleId) -> Option<&str> {
        self.modules.get(module.index()).map(|m| m.name.as_str())
    }
}
