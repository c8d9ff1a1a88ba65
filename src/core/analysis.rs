/// Static analysis: counts the distinct renderings a document can produce
/// without sampling anything or running scripts.
///
/// The AST is mirrored into an arena of fork and reference nodes addressed by
/// index. A reference registers itself on the fork it reads, so a fork's count
/// is its own branches plus whatever extra variety its references add. An
/// identifier declared in mutually exclusive branches names every one of its
/// forks, and references register on all of them.
/// Documents whose references form a cycle do not terminate.
use num_bigint::BigUint;
use rustc_hash::FxHashMap;

use crate::schema::ast::{Ast, AstNode, Choice, Document, Reference};

type TreeId = usize;
type ForkId = usize;
type RefId = usize;

/// Result of [`analyze_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub possible_outcomes: BigUint,
    /// Fork nodes in the document, nested ones included.
    pub forks: usize,
    /// Reference nodes in the document, nested ones included.
    pub references: usize,
    /// Identifiers referenced but never declared in this document.
    pub unresolved: Vec<String>,
}

#[derive(Debug, Default)]
struct Tree {
    forks: Vec<ForkId>,
}

#[derive(Debug)]
struct ForkNode {
    branches: Vec<TreeId>,
    refs: Vec<RefId>,
    count: Option<BigUint>,
}

#[derive(Debug)]
struct RefNode {
    /// One subtree per branch index the reference maps, fallbacks included.
    mappings: Vec<TreeId>,
}

#[derive(Debug, Default)]
struct AnalysisGraph {
    trees: Vec<Tree>,
    forks: Vec<ForkNode>,
    refs: Vec<RefNode>,
    by_name: FxHashMap<String, Vec<ForkId>>,
    fork_nodes: usize,
    reference_nodes: usize,
    unresolved: Vec<String>,
}

/// Count the possible outcomes of a parsed document.
pub fn analyze_document(document: &Document) -> Analysis {
    let mut graph = AnalysisGraph::default();
    let root = graph.build_tree(&document.nodes);
    let possible_outcomes = graph.count_tree(root);
    Analysis {
        possible_outcomes,
        forks: graph.fork_nodes,
        references: graph.reference_nodes,
        unresolved: graph.unresolved,
    }
}

impl AnalysisGraph {
    fn build_tree(&mut self, ast: &Ast) -> TreeId {
        let id = self.trees.len();
        self.trees.push(Tree::default());
        for node in ast {
            match node {
                AstNode::Text(_) => {}
                AstNode::Fork(fork) => {
                    self.fork_nodes += 1;
                    let branches = fork
                        .weights
                        .iter()
                        .map(|w| self.build_choice(&w.value))
                        .collect();
                    let fork_id = self.push_fork(branches);
                    if let Some(name) = &fork.identifier {
                        self.declare(name, fork_id);
                    }
                    self.trees[id].forks.push(fork_id);
                }
                AstNode::Reference(reference) => {
                    self.reference_nodes += 1;
                    if let Some(mirror) = self.build_reference(reference) {
                        self.trees[id].forks.push(mirror);
                    }
                }
            }
        }
        id
    }

    fn build_choice(&mut self, choice: &Choice) -> TreeId {
        match choice {
            Choice::Ast(ast) => self.build_tree(ast),
            // Opaque to analysis: one outcome.
            Choice::Script(_) | Choice::Call(_) => self.build_tree(&Vec::new()),
        }
    }

    fn push_fork(&mut self, branches: Vec<TreeId>) -> ForkId {
        self.forks.push(ForkNode {
            branches,
            refs: Vec::new(),
            count: None,
        });
        self.forks.len() - 1
    }

    fn declare(&mut self, name: &str, fork: ForkId) {
        let forks = self.by_name.entry(name.to_string()).or_default();
        if !forks.contains(&fork) {
            forks.push(fork);
        }
    }

    /// Wire a reference into the graph. Returns the mirror fork a re-execute
    /// reference introduces, which the enclosing tree must count.
    fn build_reference(&mut self, reference: &Reference) -> Option<ForkId> {
        let name = &reference.referred_identifier;
        let Some(targets) = self.by_name.get(name).cloned() else {
            if !self.unresolved.contains(name) {
                self.unresolved.push(name.clone());
            }
            return None;
        };

        let (targets, mirror) = if reference.re_execute {
            // Re-running whichever declaration executed: one fork over all of
            // their branches.
            let branches = targets
                .iter()
                .flat_map(|&target| self.forks[target].branches.clone())
                .collect();
            let mirror = self.push_fork(branches);
            (vec![mirror], Some(mirror))
        } else {
            (targets, None)
        };

        for &target in &targets {
            if !reference.is_copy() {
                self.attach_mappings(reference, target);
            }
            if let Some(alias) = &reference.identifier {
                self.declare(alias, target);
            }
        }
        mirror
    }

    /// One RefNode on `target`, with a subtree per branch index the reference
    /// maps, fallbacks included.
    fn attach_mappings(&mut self, reference: &Reference, target: ForkId) {
        let branch_count = self.forks[target].branches.len();
        let mut mappings = Vec::new();
        for index in 0..branch_count {
            let choice = match reference.index_map.get(&index) {
                Some(choice) => choice,
                None => match &reference.fallback {
                    Some(fallback) => fallback.as_ref(),
                    None => continue,
                },
            };
            mappings.push(self.build_choice(choice));
        }
        self.refs.push(RefNode { mappings });
        let ref_id = self.refs.len() - 1;
        self.forks[target].refs.push(ref_id);
    }

    /// Product of the tree's sibling forks; an empty tree counts as one.
    fn count_tree(&mut self, tree: TreeId) -> BigUint {
        let forks = self.trees[tree].forks.clone();
        let mut total = BigUint::from(1u32);
        for fork in forks {
            total *= self.count_fork(fork);
        }
        total
    }

    /// Sum of branch counts, plus `count - 1` for every mapping of every
    /// reference that reads this fork.
    fn count_fork(&mut self, fork: ForkId) -> BigUint {
        if let Some(count) = &self.forks[fork].count {
            return count.clone();
        }
        let branches = self.forks[fork].branches.clone();
        let refs = self.forks[fork].refs.clone();

        let mut total = BigUint::default();
        for branch in branches {
            total += self.count_tree(branch);
        }
        for reference in refs {
            let mappings = self.refs[reference].mappings.clone();
            for mapping in mappings {
                total += self.count_tree(mapping) - 1u32;
            }
        }
        self.forks[fork].count = Some(total.clone());
        total
    }
}
