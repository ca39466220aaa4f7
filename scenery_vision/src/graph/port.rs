use crate::core_modules::frame::FrameView;
use crate::core_modules::region::{Point2, Region};
use crate::core_modules::tracker::Track;
use crate::core_modules::vision::Contour;
use std::sync::Weak;

use super::node::Node;

/// The kind of data a port carries. Fixed for the life of the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    Image,
    Points,
    Booleans,
    Record,
}

/// Structured results exchanged on `Record` ports.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Regions(Vec<Region>),
    Tracks(Vec<Track>),
    Contours(Vec<Contour>),
}

/// A value on a port. `Empty` fits every port type.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Image(FrameView),
    Points(Vec<Point2>),
    Booleans(Vec<bool>),
    Record(Record),
}

impl Payload {
    pub fn port_type(&self) -> Option<PortType> {
        match self {
            Payload::Empty => None,
            Payload::Image(_) => Some(PortType::Image),
            Payload::Points(_) => Some(PortType::Points),
            Payload::Booleans(_) => Some(PortType::Booleans),
            Payload::Record(_) => Some(PortType::Record),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn fits(&self, kind: PortType) -> bool {
        self.port_type().is_none_or(|t| t == kind)
    }

    pub fn as_image(&self) -> Option<&FrameView> {
        match self {
            Payload::Image(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_tracks(&self) -> Option<&[Track]> {
        match self {
            Payload::Record(Record::Tracks(tracks)) => Some(tracks),
            _ => None,
        }
    }

    pub fn as_regions(&self) -> Option<&[Region]> {
        match self {
            Payload::Record(Record::Regions(regions)) => Some(regions),
            _ => None,
        }
    }
}

/// Static description of a port, declared by a node behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub name: &'static str,
    pub kind: PortType,
}

impl PortSpec {
    pub const fn new(name: &'static str, kind: PortType) -> Self {
        Self { name, kind }
    }
}

/// A non-owning edge to an input port of another node.
#[derive(Debug, Clone)]
pub struct Link {
    pub target: Weak<Node>,
    pub port: usize,
}

#[derive(Debug)]
pub struct InputPort {
    pub spec: PortSpec,
    pub payload: Payload,
}

#[derive(Debug)]
pub struct OutputPort {
    pub spec: PortSpec,
    pub payload: Payload,
    pub links: Vec<Link>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fits_every_port() {
        assert!(Payload::Empty.fits(PortType::Image));
        assert!(Payload::Empty.fits(PortType::Record));
        assert!(Payload::Booleans(vec![true]).fits(PortType::Booleans));
        assert!(!Payload::Points(Vec::new()).fits(PortType::Booleans));
    }

    #[test]
    fn record_accessors() {
        let payload = Payload::Record(Record::Tracks(vec![Track::default()]));
        assert_eq!(payload.as_tracks().map(<[Track]>::len), Some(1));
        assert!(payload.as_regions().is_none());
        assert!(payload.as_image().is_none());
    }
}
