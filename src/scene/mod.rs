//! In-memory scene of typed nodes addressed by [`NodeId`].
//!
//! Callers hold plain identifiers; every access resolves the identifier
//! against the scene and checks the node kind, so a dangling or mistyped
//! reference surfaces as a [`SceneError`] instead of a crash.

mod nodes;

pub use nodes::{
	ContourNode, ControlPoint, ImageData, ImageDataError, LinearTransformNode, ModelNode,
	PointListNode, VolumeGeometry, VolumeNode,
};

use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(String);

impl NodeId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for NodeId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for NodeId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
	Volume,
	LinearTransform,
	PointList,
	Model,
	Contour,
}

impl NodeKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Volume => "VolumeNode",
			Self::LinearTransform => "LinearTransformNode",
			Self::PointList => "PointListNode",
			Self::Model => "ModelNode",
			Self::Contour => "ContourNode",
		}
	}
}

impl Display for NodeKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	Volume(VolumeNode),
	LinearTransform(LinearTransformNode),
	PointList(PointListNode),
	Model(ModelNode),
	Contour(ContourNode),
}

impl Node {
	pub const fn kind(&self) -> NodeKind {
		match self {
			Self::Volume(_) => NodeKind::Volume,
			Self::LinearTransform(_) => NodeKind::LinearTransform,
			Self::PointList(_) => NodeKind::PointList,
			Self::Model(_) => NodeKind::Model,
			Self::Contour(_) => NodeKind::Contour,
		}
	}

	pub fn name(&self) -> &str {
		match self {
			Self::Volume(node) => &node.name,
			Self::LinearTransform(node) => &node.name,
			Self::PointList(node) => &node.name,
			Self::Model(node) => &node.name,
			Self::Contour(node) => &node.name,
		}
	}
}

impl From<VolumeNode> for Node {
	fn from(node: VolumeNode) -> Self {
		Self::Volume(node)
	}
}

impl From<LinearTransformNode> for Node {
	fn from(node: LinearTransformNode) -> Self {
		Self::LinearTransform(node)
	}
}

impl From<PointListNode> for Node {
	fn from(node: PointListNode) -> Self {
		Self::PointList(node)
	}
}

impl From<ModelNode> for Node {
	fn from(node: ModelNode) -> Self {
		Self::Model(node)
	}
}

impl From<ContourNode> for Node {
	fn from(node: ContourNode) -> Self {
		Self::Contour(node)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
	#[error("Node {id} not found in scene")]
	NotFound { id: NodeId },

	#[error("Node {id} is a {actual}, expected a {expected}")]
	WrongKind {
		id: NodeId,
		expected: NodeKind,
		actual: NodeKind,
	},
}

/// Short description of a node for reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
	pub id: NodeId,
	pub kind: NodeKind,
	pub name: String,
	pub detail: String,
}

#[derive(Debug, Default)]
pub struct Scene {
	nodes: HashMap<NodeId, Node>,
	order: Vec<NodeId>,
	counters: HashMap<NodeKind, usize>,
}

macro_rules! typed_accessors {
	($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
		pub fn $get(&self, id: &NodeId) -> Result<&$ty, SceneError> {
			match self.node(id)? {
				Node::$variant(node) => Ok(node),
				other => Err(SceneError::WrongKind {
					id: id.clone(),
					expected: NodeKind::$variant,
					actual: other.kind(),
				}),
			}
		}

		pub fn $get_mut(&mut self, id: &NodeId) -> Result<&mut $ty, SceneError> {
			let node = self
				.nodes
				.get_mut(id)
				.ok_or_else(|| SceneError::NotFound { id: id.clone() })?;
			match node {
				Node::$variant(node) => Ok(node),
				other => Err(SceneError::WrongKind {
					id: id.clone(),
					expected: NodeKind::$variant,
					actual: other.kind(),
				}),
			}
		}
	};
}

impl Scene {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a node and returns its generated identifier (`VolumeNode1`, ...).
	pub fn add_node(&mut self, node: impl Into<Node>) -> NodeId {
		let node = node.into();
		let kind = node.kind();
		let counter = self.counters.entry(kind).or_insert(0);
		*counter += 1;
		let id = NodeId(format!("{kind}{counter}"));
		debug!(node.id = %id, node.name = node.name(), "Added node to scene");
		self.order.push(id.clone());
		self.nodes.insert(id.clone(), node);
		id
	}

	pub fn node(&self, id: &NodeId) -> Result<&Node, SceneError> {
		self.nodes
			.get(id)
			.ok_or_else(|| SceneError::NotFound { id: id.clone() })
	}

	pub fn contains(&self, id: &NodeId) -> bool {
		self.nodes.contains_key(id)
	}

	pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
		self.order.retain(|existing| existing != id);
		self.nodes.remove(id)
	}

	typed_accessors!(volume, volume_mut, Volume, VolumeNode);
	typed_accessors!(
		linear_transform,
		linear_transform_mut,
		LinearTransform,
		LinearTransformNode
	);
	typed_accessors!(point_list, point_list_mut, PointList, PointListNode);
	typed_accessors!(model, model_mut, Model, ModelNode);
	typed_accessors!(contour, contour_mut, Contour, ContourNode);

	/// Nodes in insertion order.
	pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
		self.order
			.iter()
			.filter_map(|id| self.nodes.get(id).map(|node| (id, node)))
	}

	/// First node with the given name, in insertion order.
	pub fn find_by_name(&self, name: &str) -> Option<&NodeId> {
		self.nodes()
			.find(|(_, node)| node.name() == name)
			.map(|(id, _)| id)
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn summary(&self) -> Vec<NodeSummary> {
		self.nodes()
			.map(|(id, node)| NodeSummary {
				id: id.clone(),
				kind: node.kind(),
				name: node.name().to_owned(),
				detail: describe(node),
			})
			.collect()
	}
}

fn describe(node: &Node) -> String {
	match node {
		Node::Volume(volume) => match &volume.image {
			Some(image) => {
				let [x, y, z] = image.dims();
				let kind = if volume.labelmap { "labelmap" } else { "scalar" };
				format!("{kind} {x}x{y}x{z}")
			}
			None => "no image data".to_owned(),
		},
		Node::LinearTransform(transform) => {
			let m = &transform.matrix_to_parent;
			format!("translation {:.2} {:.2} {:.2}", m[(0, 3)], m[(1, 3)], m[(2, 3)])
		}
		Node::PointList(points) => format!("{} points", points.len()),
		Node::Model(model) => format!(
			"{} points, {} triangles",
			model.polydata.points.len(),
			model.polydata.triangles.len()
		),
		Node::Contour(contour) => format!(
			"{} contours, {} points",
			contour.contours.len(),
			contour.point_count()
		),
	}
}
