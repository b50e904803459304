// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/tree.rs - 决策树与梯度提升树集成求值
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{collections::BTreeMap, path::Path};

use thiserror::Error;
use tracing::{info, warn};

mod parse;

pub use self::parse::{parse_model, parse_tree};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
  #[error("无法识别的树编码")]
  UnknownEncoding,
  #[error("字段 `{0}` 缺失或类型错误")]
  InvalidField(String),
  #[error("数组 `{field}` 长度为 {actual}，期望 {expected}")]
  LengthMismatch {
    field: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("树中没有节点")]
  Empty,
  #[error("节点 {node} 引用了不存在的节点 {child}")]
  ChildOutOfRange { node: i64, child: i64 },
  #[error("节点 {node} 的叶子索引 {index} 越界")]
  LeafOutOfRange { node: usize, index: usize },
  #[error("节点 {0} 的特征索引为负")]
  NegativeFeature(i64),
  #[error("特征索引 {feature} 超出特征数 {features}")]
  FeatureOutOfRange { feature: usize, features: usize },
  #[error("节点编号 {0} 重复")]
  DuplicateNode(i64),
  #[error("节点 {0} 被重复访问，树中存在环")]
  Cycle(i64),
  #[error("缺少模型主体 `learner`")]
  MissingLearner,
  #[error("I/O 错误: {0}")]
  Io(String),
  #[error("JSON 解析错误: {0}")]
  Json(String),
}

/// 节点对象编码中的单个节点
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
  Leaf {
    value: f32,
  },
  Split {
    feature: usize,
    threshold: f32,
    yes: i64,
    no: i64,
    missing: i64,
  },
}

/// 节点对象编码：节点编号 → 节点，从最小编号开始求值
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTree {
  root: i64,
  nodes: BTreeMap<i64, TreeNode>,
}

impl NodeTree {
  pub fn new(nodes: Vec<(i64, TreeNode)>) -> Result<Self, TreeError> {
    let mut map = BTreeMap::new();
    for (id, node) in nodes {
      if map.insert(id, node).is_some() {
        return Err(TreeError::DuplicateNode(id));
      }
    }
    let root = *map.keys().next().ok_or(TreeError::Empty)?;

    for (&id, node) in &map {
      if let TreeNode::Split { yes, no, missing, .. } = node {
        for child in [*yes, *no, *missing] {
          if !map.contains_key(&child) {
            return Err(TreeError::ChildOutOfRange { node: id, child });
          }
        }
      }
    }

    let tree = Self { root, nodes: map };
    tree.check_acyclic()?;
    Ok(tree)
  }

  /// 从根出发的每条路径都必须在有限步内到达叶子
  fn check_acyclic(&self) -> Result<(), TreeError> {
    let mut on_path = Vec::new();
    let mut stack = vec![(self.root, false)];
    while let Some((id, leaving)) = stack.pop() {
      if leaving {
        on_path.retain(|&n| n != id);
        continue;
      }
      if on_path.contains(&id) {
        return Err(TreeError::Cycle(id));
      }
      if let TreeNode::Split { yes, no, missing, .. } = self.nodes[&id] {
        on_path.push(id);
        stack.push((id, true));
        stack.push((yes, false));
        stack.push((no, false));
        if missing != yes && missing != no {
          stack.push((missing, false));
        }
      }
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// 分裂节点使用的最大特征索引
  pub fn max_feature(&self) -> Option<usize> {
    self
      .nodes
      .values()
      .filter_map(|node| match node {
        TreeNode::Split { feature, .. } => Some(*feature),
        TreeNode::Leaf { .. } => None,
      })
      .max()
  }

  pub fn evaluate(&self, features: &[f32]) -> f32 {
    let mut id = self.root;
    loop {
      match self.nodes[&id] {
        TreeNode::Leaf { value } => return value,
        TreeNode::Split {
          feature,
          threshold,
          yes,
          no,
          missing,
        } => {
          let value = features.get(feature).copied().unwrap_or(f32::NAN);
          id = if value.is_nan() {
            missing
          } else if value < threshold {
            yes
          } else {
            no
          };
        }
      }
    }
  }
}

/// 平铺数组编码的原始字段，未经校验
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayTreeFields {
  pub left_children: Vec<i64>,
  pub right_children: Vec<i64>,
  pub split_indices: Vec<i64>,
  pub split_conditions: Vec<f32>,
  pub default_left: Vec<bool>,
  /// `true` 表示叶子
  pub is_leaf: Vec<bool>,
  pub leaf_values: Vec<f32>,
}

/// 平铺数组编码：平行数组，节点 0 为根，叶子值经叶子索引表查找
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayTree {
  left_children: Box<[usize]>,
  right_children: Box<[usize]>,
  split_indices: Box<[usize]>,
  split_conditions: Box<[f32]>,
  default_left: Box<[bool]>,
  is_leaf: Box<[bool]>,
  leaf_values: Box<[f32]>,
  leaf_index_by_node: Box<[usize]>,
}

impl ArrayTree {
  pub fn new(fields: ArrayTreeFields) -> Result<Self, TreeError> {
    let n = fields.is_leaf.len();
    if n == 0 {
      return Err(TreeError::Empty);
    }
    for (field, actual) in [
      ("left_children", fields.left_children.len()),
      ("right_children", fields.right_children.len()),
      ("split_indices", fields.split_indices.len()),
      ("split_conditions", fields.split_conditions.len()),
      ("default_left", fields.default_left.len()),
    ] {
      if actual != n {
        return Err(TreeError::LengthMismatch {
          field,
          expected: n,
          actual,
        });
      }
    }

    let mut left_children = vec![0usize; n];
    let mut right_children = vec![0usize; n];
    let mut split_indices = vec![0usize; n];
    let mut leaf_index_by_node = vec![0usize; n];
    let mut leaf_counter = 0usize;

    for node in 0..n {
      if fields.is_leaf[node] {
        if leaf_counter >= fields.leaf_values.len() {
          return Err(TreeError::LeafOutOfRange {
            node,
            index: leaf_counter,
          });
        }
        leaf_index_by_node[node] = leaf_counter;
        leaf_counter += 1;
        continue;
      }

      let check_child = |child: i64| -> Result<usize, TreeError> {
        if child < 0 || child as usize >= n {
          Err(TreeError::ChildOutOfRange {
            node: node as i64,
            child,
          })
        } else {
          Ok(child as usize)
        }
      };
      left_children[node] = check_child(fields.left_children[node])?;
      right_children[node] = check_child(fields.right_children[node])?;

      let feature = fields.split_indices[node];
      if feature < 0 {
        return Err(TreeError::NegativeFeature(node as i64));
      }
      split_indices[node] = feature as usize;
    }

    let tree = Self {
      left_children: left_children.into_boxed_slice(),
      right_children: right_children.into_boxed_slice(),
      split_indices: split_indices.into_boxed_slice(),
      split_conditions: fields.split_conditions.into_boxed_slice(),
      default_left: fields.default_left.into_boxed_slice(),
      is_leaf: fields.is_leaf.into_boxed_slice(),
      leaf_values: fields.leaf_values.into_boxed_slice(),
      leaf_index_by_node: leaf_index_by_node.into_boxed_slice(),
    };
    tree.check_acyclic()?;
    Ok(tree)
  }

  fn check_acyclic(&self) -> Result<(), TreeError> {
    let n = self.is_leaf.len();
    let mut on_path = vec![false; n];
    let mut stack = vec![(0usize, false)];
    while let Some((node, leaving)) = stack.pop() {
      if leaving {
        on_path[node] = false;
        continue;
      }
      if on_path[node] {
        return Err(TreeError::Cycle(node as i64));
      }
      if !self.is_leaf[node] {
        on_path[node] = true;
        stack.push((node, true));
        stack.push((self.left_children[node], false));
        stack.push((self.right_children[node], false));
      }
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.is_leaf.len()
  }

  pub fn is_empty(&self) -> bool {
    self.is_leaf.is_empty()
  }

  pub fn max_feature(&self) -> Option<usize> {
    self
      .split_indices
      .iter()
      .zip(self.is_leaf.iter())
      .filter(|(_, leaf)| !**leaf)
      .map(|(feature, _)| *feature)
      .max()
  }

  pub fn evaluate(&self, features: &[f32]) -> f32 {
    let mut node = 0usize;
    while !self.is_leaf[node] {
      let value = features
        .get(self.split_indices[node])
        .copied()
        .unwrap_or(f32::NAN);
      let go_left = if value.is_nan() {
        self.default_left[node]
      } else {
        value < self.split_conditions[node]
      };
      node = if go_left {
        self.left_children[node]
      } else {
        self.right_children[node]
      };
    }
    self.leaf_values[self.leaf_index_by_node[node]]
  }
}

/// 两种树编码，在加载时确定
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionTree {
  Nodes(NodeTree),
  Array(ArrayTree),
}

impl DecisionTree {
  /// 特征为 NaN 时走默认分支
  pub fn evaluate(&self, features: &[f32]) -> f32 {
    match self {
      DecisionTree::Nodes(tree) => tree.evaluate(features),
      DecisionTree::Array(tree) => tree.evaluate(features),
    }
  }

  pub fn max_feature(&self) -> Option<usize> {
    match self {
      DecisionTree::Nodes(tree) => tree.max_feature(),
      DecisionTree::Array(tree) => tree.max_feature(),
    }
  }

  /// 所有分裂特征都必须落在 `[0, features)` 内
  pub fn check_features(&self, features: usize) -> Result<(), TreeError> {
    match self.max_feature() {
      Some(feature) if feature >= features => Err(TreeError::FeatureOutOfRange { feature, features }),
      _ => Ok(()),
    }
  }
}

/// 梯度提升树集成：预测值为各树输出之和加基准分
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeEnsemble {
  base_score: f32,
  trees: Vec<DecisionTree>,
  feature_names: Vec<String>,
}

impl TreeEnsemble {
  pub fn new(base_score: f32, trees: Vec<DecisionTree>, feature_names: Vec<String>) -> Self {
    Self {
      base_score,
      trees,
      feature_names,
    }
  }

  /// 不含任何树的空集成，调用方据此改用回退估计
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn from_json_str(text: &str) -> Result<Self, TreeError> {
    let value: serde_json::Value =
      serde_json::from_str(text).map_err(|e| TreeError::Json(e.to_string()))?;
    parse_model(&value)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, TreeError> {
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| TreeError::Io(e.to_string()))?;
    Self::from_json_str(&text)
  }

  /// 任何错误都退化为空集成并记录警告
  pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref();
    match Self::load(path) {
      Ok(ensemble) => {
        info!(
          "加载树模型 {}: {} 棵树, {} 个特征, 基准分 {}",
          path.display(),
          ensemble.trees.len(),
          ensemble.feature_names.len(),
          ensemble.base_score
        );
        ensemble
      }
      Err(e) => {
        warn!("树模型 {} 不可用, 改用回退估计: {}", path.display(), e);
        Self::empty()
      }
    }
  }

  pub fn base_score(&self) -> f32 {
    self.base_score
  }

  pub fn trees(&self) -> &[DecisionTree] {
    &self.trees
  }

  pub fn has_trees(&self) -> bool {
    !self.trees.is_empty()
  }

  pub fn feature_names(&self) -> &[String] {
    &self.feature_names
  }

  pub fn predict(&self, features: &[f32]) -> f32 {
    self
      .trees
      .iter()
      .map(|tree| tree.evaluate(features))
      .sum::<f32>()
      + self.base_score
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 根节点 f0 < 0.5，左叶 1.0，右叶 -1.0
  fn stump(default_left: bool) -> ArrayTree {
    ArrayTree::new(ArrayTreeFields {
      left_children: vec![1, -1, -1],
      right_children: vec![2, -1, -1],
      split_indices: vec![0, 0, 0],
      split_conditions: vec![0.5, 0.0, 0.0],
      default_left: vec![default_left, false, false],
      is_leaf: vec![false, true, true],
      leaf_values: vec![1.0, -1.0],
    })
    .unwrap()
  }

  #[test]
  fn test_array_stump() {
    let tree = stump(true);
    assert_eq!(tree.evaluate(&[0.2]), 1.0);
    assert_eq!(tree.evaluate(&[0.8]), -1.0);
    assert_eq!(tree.evaluate(&[0.5]), -1.0);
  }

  #[test]
  fn test_array_missing_follows_default() {
    assert_eq!(stump(true).evaluate(&[f32::NAN]), 1.0);
    assert_eq!(stump(false).evaluate(&[f32::NAN]), -1.0);
    // 特征向量过短等同缺失
    assert_eq!(stump(false).evaluate(&[]), -1.0);
  }

  #[test]
  fn test_array_validation() {
    let base = ArrayTreeFields {
      left_children: vec![1, -1, -1],
      right_children: vec![2, -1, -1],
      split_indices: vec![0, 0, 0],
      split_conditions: vec![0.5, 0.0, 0.0],
      default_left: vec![true, false, false],
      is_leaf: vec![false, true, true],
      leaf_values: vec![1.0, -1.0],
    };

    let mut bad_child = base.clone();
    bad_child.right_children[0] = 7;
    assert_eq!(
      ArrayTree::new(bad_child),
      Err(TreeError::ChildOutOfRange { node: 0, child: 7 })
    );

    let mut short_leaves = base.clone();
    short_leaves.leaf_values.pop();
    assert_eq!(
      ArrayTree::new(short_leaves),
      Err(TreeError::LeafOutOfRange { node: 2, index: 1 })
    );

    let mut cycle = base.clone();
    cycle.is_leaf[1] = false;
    cycle.left_children[1] = 0;
    cycle.right_children[1] = 2;
    assert_eq!(ArrayTree::new(cycle), Err(TreeError::Cycle(0)));

    let mut mismatched = base;
    mismatched.default_left.pop();
    assert!(matches!(
      ArrayTree::new(mismatched),
      Err(TreeError::LengthMismatch {
        field: "default_left",
        ..
      })
    ));
  }

  fn node_stump() -> NodeTree {
    NodeTree::new(vec![
      (
        0,
        TreeNode::Split {
          feature: 1,
          threshold: 0.5,
          yes: 1,
          no: 2,
          missing: 2,
        },
      ),
      (1, TreeNode::Leaf { value: 0.25 }),
      (2, TreeNode::Leaf { value: -0.75 }),
    ])
    .unwrap()
  }

  #[test]
  fn test_node_tree() {
    let tree = node_stump();
    assert_eq!(tree.evaluate(&[9.0, 0.1]), 0.25);
    assert_eq!(tree.evaluate(&[9.0, 0.9]), -0.75);
    assert_eq!(tree.evaluate(&[9.0, f32::NAN]), -0.75);
    assert_eq!(tree.evaluate(&[9.0]), -0.75);
  }

  #[test]
  fn test_node_tree_validation() {
    assert_eq!(NodeTree::new(vec![]), Err(TreeError::Empty));
    assert_eq!(
      NodeTree::new(vec![(
        3,
        TreeNode::Split {
          feature: 0,
          threshold: 0.0,
          yes: 4,
          no: 3,
          missing: 3,
        }
      )]),
      Err(TreeError::ChildOutOfRange { node: 3, child: 4 })
    );
    assert_eq!(
      NodeTree::new(vec![
        (
          0,
          TreeNode::Split {
            feature: 0,
            threshold: 0.0,
            yes: 1,
            no: 0,
            missing: 1,
          }
        ),
        (1, TreeNode::Leaf { value: 1.0 }),
      ]),
      Err(TreeError::Cycle(0))
    );
    assert_eq!(
      NodeTree::new(vec![
        (0, TreeNode::Leaf { value: 1.0 }),
        (0, TreeNode::Leaf { value: 2.0 }),
      ]),
      Err(TreeError::DuplicateNode(0))
    );
  }

  #[test]
  fn test_shared_subtree_is_not_cycle() {
    let tree = NodeTree::new(vec![
      (
        0,
        TreeNode::Split {
          feature: 0,
          threshold: 0.5,
          yes: 1,
          no: 1,
          missing: 1,
        },
      ),
      (1, TreeNode::Leaf { value: 2.0 }),
    ])
    .unwrap();
    assert_eq!(tree.evaluate(&[0.0]), 2.0);
  }

  #[test]
  fn test_ensemble_predict() {
    let ensemble = TreeEnsemble::new(
      0.5,
      vec![
        DecisionTree::Array(stump(true)),
        DecisionTree::Nodes(node_stump()),
      ],
      vec!["f0".into(), "f1".into()],
    );
    assert!(ensemble.has_trees());
    assert_eq!(ensemble.predict(&[0.2, 0.1]), 1.0 + 0.25 + 0.5);
    assert_eq!(TreeEnsemble::empty().predict(&[1.0]), 0.0);
  }

  #[test]
  fn test_load_or_empty_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    assert!(!TreeEnsemble::load_or_empty(dir.path().join("missing.json")).has_trees());

    let path = dir.path().join("broken.json");
    std::fs::write(
      &path,
      r#"{"learner":{"gradient_booster":{"model":{"trees":[{"nodes":[{"nodeid":0,"yes":5,"no":6,"split":0,"split_condition":1.0}]}]}}}}"#,
    )
    .unwrap();
    let ensemble = TreeEnsemble::load_or_empty(&path);
    assert!(!ensemble.has_trees());
    assert_eq!(ensemble.base_score(), 0.0);

    let path = dir.path().join("wide.json");
    std::fs::write(
      &path,
      r#"{"learner":{"feature_names":["eye"]},"trees":[{"nodes":[{"nodeid":0,"yes":1,"no":2,"split":3,"split_condition":1.0},{"nodeid":1,"leaf":1.0},{"nodeid":2,"leaf":2.0}]}]}"#,
    )
    .unwrap();
    assert!(!TreeEnsemble::load_or_empty(&path).has_trees());
  }
}
