//! Component definitions: reusable hardware block types, interned once
//! from the parsed input document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};
use crate::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceType {
    Clock,
    Reset,
    Data,
    Conduit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn reversed(self) -> Direction {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum SignalRole {
    Clock,
    Reset,
    Data,
    Header,
    Valid,
    Ready,
    Sop,
    Eop,
    LinkpointId,
    LinkId,
    ConduitIn,
    ConduitOut,
}

impl SignalRole {
    /// Control-role signals (valid/ready/sop/eop/clock/reset) are always
    /// width 1 and are not user-widened.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            SignalRole::Valid
                | SignalRole::Ready
                | SignalRole::Sop
                | SignalRole::Eop
                | SignalRole::Clock
                | SignalRole::Reset
        )
    }

    /// Sense is derived from role: `ready` and `conduit-in` run against the
    /// data direction, everything else runs with it.
    pub fn sense(self) -> Sense {
        match self {
            SignalRole::Ready | SignalRole::ConduitIn => Sense::Reverse,
            _ => Sense::Forward,
        }
    }

    /// The logical field name this role carries on the wire, used to key
    /// `Protocol::logical`/`Protocol::state`.
    pub fn field_name(self, subtype: &str) -> String {
        match self {
            SignalRole::Data if !subtype.is_empty() => format!("data_{subtype}"),
            SignalRole::Header if !subtype.is_empty() => format!("header_{subtype}"),
            SignalRole::Data => "data".to_string(),
            SignalRole::Header => "header".to_string(),
            SignalRole::Valid => "valid".to_string(),
            SignalRole::Ready => "ready".to_string(),
            SignalRole::Sop => "sop".to_string(),
            SignalRole::Eop => "eop".to_string(),
            SignalRole::LinkpointId => "linkpoint_id".to_string(),
            SignalRole::LinkId => "flow_id".to_string(),
            SignalRole::Clock => "clock".to_string(),
            SignalRole::Reset => "reset".to_string(),
            SignalRole::ConduitIn => format!("conduit_in_{subtype}"),
            SignalRole::ConduitOut => format!("conduit_out_{subtype}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub role: SignalRole,
    /// Free-form tag distinguishing multiple data/header bundles on one
    /// interface; empty string when there is only one.
    pub subtype: String,
    pub width: Expr,
}

impl Signal {
    pub fn sense(&self) -> Sense {
        self.role.sense()
    }

    pub fn field_name(&self) -> String {
        self.role.field_name(&self.subtype)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkpointType {
    Unicast,
    Broadcast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linkpoint {
    pub name: String,
    pub ty: LinkpointType,
    pub encoding: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub ty: InterfaceType,
    pub direction: Direction,
    /// Name of the clock interface on the same component. Required for
    /// `Data` interfaces.
    pub clock_interface: Option<String>,
    pub signals: Vec<Signal>,
    pub linkpoints: Vec<Linkpoint>,
}

impl Interface {
    pub fn linkpoint(&self, name: &str) -> Option<&Linkpoint> {
        self.linkpoints.iter().find(|lp| lp.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub interfaces: Vec<Interface>,
    pub parameters: Vec<String>,
}

impl Component {
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Validate that every `Data` interface names an existing clock
    /// interface of the same component.
    pub fn validate(&self) -> Result<()> {
        for iface in &self.interfaces {
            if iface.ty == InterfaceType::Data {
                let clock_name = iface.clock_interface.as_deref().ok_or_else(|| {
                    CompileError::spec(format!(
                        "component `{}` interface `{}` is a data interface with no clock interface",
                        self.name, iface.name
                    ))
                })?;
                let clock_iface = self.interface(clock_name).ok_or_else(|| {
                    CompileError::spec(format!(
                        "component `{}` interface `{}` names unknown clock interface `{}`",
                        self.name, iface.name, clock_name
                    ))
                })?;
                if clock_iface.ty != InterfaceType::Clock {
                    return Err(CompileError::spec(format!(
                        "component `{}` interface `{}`'s clock interface `{}` is not of type clock",
                        self.name, iface.name, clock_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Process-wide registry of interned component definitions: written once
/// during input ingestion, read-only thereafter.
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    components: BTreeMap<String, Component>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, component: Component) -> Result<()> {
        component.validate()?;
        self.components.insert(component.name.clone(), component);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }
}
