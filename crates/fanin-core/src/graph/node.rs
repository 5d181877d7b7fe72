//! Graph nodes: scm leaves and upstream dependencies.

use std::collections::BTreeSet;

use crate::graph::dependency_node::DependencyNode;
use crate::material::{Fingerprint, MaterialConfig};

/// Parent/child links of a node, expressed as fingerprint keys into the
/// graph's node index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLinks {
    parents: BTreeSet<Fingerprint>,
    /// Configuration order, no duplicates.
    children: Vec<Fingerprint>,
}

impl NodeLinks {
    pub fn parents(&self) -> &BTreeSet<Fingerprint> {
        &self.parents
    }

    pub fn children(&self) -> &[Fingerprint] {
        &self.children
    }

    pub fn add_parent(&mut self, parent: Fingerprint) {
        self.parents.insert(parent);
    }

    pub fn add_child(&mut self, child: Fingerprint) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }
}

/// Terminal node for scm, package and pluggable-scm materials.
#[derive(Debug)]
pub struct ScmLeafNode {
    material: MaterialConfig,
    fingerprint: Fingerprint,
    links: NodeLinks,
}

impl ScmLeafNode {
    fn new(material: MaterialConfig) -> Self {
        let fingerprint = material.fingerprint();
        Self {
            material,
            fingerprint,
            links: NodeLinks::default(),
        }
    }
}

/// A node of the fan-in graph, identified by its material fingerprint.
#[derive(Debug)]
pub enum MaterialNode {
    ScmLeaf(ScmLeafNode),
    Dependency(DependencyNode),
}

impl MaterialNode {
    pub fn create(material: MaterialConfig) -> Self {
        match material {
            MaterialConfig::Dependency(dependency) => {
                MaterialNode::Dependency(DependencyNode::new(dependency))
            }
            leaf @ (MaterialConfig::Scm(_)
            | MaterialConfig::Package(_)
            | MaterialConfig::PluggableScm(_)) => MaterialNode::ScmLeaf(ScmLeafNode::new(leaf)),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            MaterialNode::ScmLeaf(leaf) => &leaf.fingerprint,
            MaterialNode::Dependency(node) => node.fingerprint(),
        }
    }

    pub fn material(&self) -> &MaterialConfig {
        match self {
            MaterialNode::ScmLeaf(leaf) => &leaf.material,
            MaterialNode::Dependency(node) => node.material(),
        }
    }

    pub fn links(&self) -> &NodeLinks {
        match self {
            MaterialNode::ScmLeaf(leaf) => &leaf.links,
            MaterialNode::Dependency(node) => node.links(),
        }
    }

    pub fn links_mut(&mut self) -> &mut NodeLinks {
        match self {
            MaterialNode::ScmLeaf(leaf) => &mut leaf.links,
            MaterialNode::Dependency(node) => node.links_mut(),
        }
    }

    pub fn as_dependency(&self) -> Option<&DependencyNode> {
        match self {
            MaterialNode::Dependency(node) => Some(node),
            MaterialNode::ScmLeaf(_) => None,
        }
    }

    pub fn is_scm_leaf(&self) -> bool {
        matches!(self, MaterialNode::ScmLeaf(_))
    }
}

impl PartialEq for MaterialNode {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for MaterialNode {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{
        DependencyMaterialConfig, PackageMaterialConfig, PluggableScmMaterialConfig,
        ScmMaterialConfig,
    };

    #[test]
    fn test_factory_creates_leaves_for_scm_like_materials() {
        let git = MaterialNode::create(ScmMaterialConfig::git("repo").into());
        let pkg = MaterialNode::create(MaterialConfig::Package(PackageMaterialConfig {
            repository_id: "repo".to_string(),
            package_id: "pkg".to_string(),
            name: None,
        }));
        let plugin = MaterialNode::create(MaterialConfig::PluggableScm(
            PluggableScmMaterialConfig {
                plugin_id: "github.pr".to_string(),
                scm_id: "scm-1".to_string(),
                folder: None,
                name: None,
            },
        ));
        assert!(git.is_scm_leaf());
        assert!(pkg.is_scm_leaf());
        assert!(plugin.is_scm_leaf());
    }

    #[test]
    fn test_factory_creates_dependency_node() {
        let node = MaterialNode::create(DependencyMaterialConfig::new("up", "s").into());
        assert!(node.as_dependency().is_some());
        assert!(!node.is_scm_leaf());
    }

    #[test]
    fn test_nodes_equal_by_fingerprint() {
        let a = MaterialNode::create(ScmMaterialConfig::git("repo").with_folder("one").into());
        let b = MaterialNode::create(ScmMaterialConfig::git("repo").with_folder("two").into());
        assert_eq!(a, b);
    }

    #[test]
    fn test_links_deduplicate_children() {
        let mut links = NodeLinks::default();
        let fp = MaterialConfig::from(ScmMaterialConfig::git("repo")).fingerprint();
        links.add_child(fp.clone());
        links.add_child(fp.clone());
        links.add_parent(fp.clone());
        links.add_parent(fp);
        assert_eq!(links.children().len(), 1);
        assert_eq!(links.parents().len(), 1);
    }
}
