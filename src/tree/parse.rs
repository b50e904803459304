// 该文件是 Yuxian （鱼鲜） 项目的一部分。
// src/tree/parse.rs - XGBoost JSON 模型解析
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

use serde_json::{Map, Value};
use tracing::debug;

use super::{ArrayTree, ArrayTreeFields, DecisionTree, NodeTree, TreeEnsemble, TreeError, TreeNode};

const TREE_POINTERS: [&str; 3] = [
  "/learner/gradient_booster/model/trees",
  "/learner/gradient_booster/gbtree/model/trees",
  "/trees",
];

/// 解析完整模型。任一棵树无效，或在给出特征名时引用了范围外的特征，即整体失败。
pub fn parse_model(root: &Value) -> Result<TreeEnsemble, TreeError> {
  let learner = root
    .get("learner")
    .and_then(Value::as_object)
    .ok_or(TreeError::MissingLearner)?;

  let base_score = base_score(learner);
  let feature_names: Vec<String> = learner
    .get("feature_names")
    .and_then(Value::as_array)
    .map(|names| {
      names
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect()
    })
    .unwrap_or_default();

  let trees = match TREE_POINTERS
    .iter()
    .find_map(|pointer| root.pointer(pointer).and_then(Value::as_array))
  {
    Some(trees) => trees
      .iter()
      .map(|tree| parse_tree(tree, &feature_names))
      .collect::<Result<Vec<_>, _>>()?,
    None => Vec::new(),
  };

  if !feature_names.is_empty() {
    for tree in &trees {
      tree.check_features(feature_names.len())?;
    }
  }

  debug!(
    "解析树模型: {} 棵树, {} 个特征, 基准分 {}",
    trees.len(),
    feature_names.len(),
    base_score
  );
  Ok(TreeEnsemble::new(base_score, trees, feature_names))
}

/// 依次查找 `attributes.base_score`、`learner_model_param.base_score`（字符串）
/// 与 `base_score`（数值），都没有时为 0
fn base_score(learner: &Map<String, Value>) -> f32 {
  let from_string = |section: &str| {
    learner
      .get(section)
      .and_then(|s| s.get("base_score"))
      .and_then(Value::as_str)
      .and_then(parse_score_string)
  };

  from_string("attributes")
    .or_else(|| from_string("learner_model_param"))
    .or_else(|| learner.get("base_score").and_then(Value::as_f64).map(|v| v as f32))
    .unwrap_or(0.0)
}

/// 新版 XGBoost 会把基准分写成 `"[5E-1]"`
fn parse_score_string(text: &str) -> Option<f32> {
  text
    .trim()
    .trim_start_matches('[')
    .trim_end_matches(']')
    .trim()
    .parse()
    .ok()
}

/// 按出现的字段选择编码
pub fn parse_tree(value: &Value, feature_names: &[String]) -> Result<DecisionTree, TreeError> {
  let object = value.as_object().ok_or(TreeError::UnknownEncoding)?;

  if object.contains_key("left_children") && object.contains_key("right_children") {
    parse_array_tree(object).map(DecisionTree::Array)
  } else if let Some(nodes) = object.get("nodes").and_then(Value::as_array) {
    let mut flat = Vec::new();
    for node in nodes {
      flatten_nodes(node, &mut flat)?;
    }
    let nodes = flat
      .into_iter()
      .map(|node| parse_node(node, feature_names))
      .collect::<Result<Vec<_>, _>>()?;
    NodeTree::new(nodes).map(DecisionTree::Nodes)
  } else {
    Err(TreeError::UnknownEncoding)
  }
}

fn parse_array_tree(object: &Map<String, Value>) -> Result<ArrayTree, TreeError> {
  let left_children = int_array(object, "left_children")?;
  let right_children = int_array(object, "right_children")?;
  let split_indices = int_array(object, "split_indices")?;
  let split_conditions = float_array(object, "split_conditions")?;
  let n = left_children.len();

  let default_left = match object.get("default_left") {
    Some(_) => bool_array(object, "default_left")?,
    None => vec![true; n],
  };
  // 0 为分裂节点，1 为叶子；缺省时按左孩子为 -1 判定
  let is_leaf = match object.get("node_types") {
    Some(_) => int_array(object, "node_types")?
      .into_iter()
      .map(|t| t == 1)
      .collect(),
    None => left_children.iter().map(|&c| c == -1).collect::<Vec<_>>(),
  };
  // 缺省时叶子值取自叶子节点的 split_conditions
  let leaf_values = match object.get("leaf_values") {
    Some(_) => float_array(object, "leaf_values")?,
    None => is_leaf
      .iter()
      .zip(&split_conditions)
      .filter(|&(&leaf, _)| leaf)
      .map(|(_, &value)| value)
      .collect(),
  };

  ArrayTree::new(ArrayTreeFields {
    left_children,
    right_children,
    split_indices,
    split_conditions,
    default_left,
    is_leaf,
    leaf_values,
  })
}

/// 展开 `xgb.dump_model` 风格的嵌套 `children`
fn flatten_nodes<'a>(node: &'a Value, out: &mut Vec<&'a Map<String, Value>>) -> Result<(), TreeError> {
  let object = node
    .as_object()
    .ok_or_else(|| TreeError::InvalidField("nodes".to_string()))?;
  out.push(object);
  if let Some(children) = object.get("children").and_then(Value::as_array) {
    for child in children {
      flatten_nodes(child, out)?;
    }
  }
  Ok(())
}

fn parse_node(object: &Map<String, Value>, feature_names: &[String]) -> Result<(i64, TreeNode), TreeError> {
  let id = first_int(object, &["nodeid"])?;

  if let Some(leaf) = object.get("leaf") {
    let value = leaf
      .as_f64()
      .ok_or_else(|| TreeError::InvalidField("leaf".to_string()))?;
    return Ok((id, TreeNode::Leaf { value: value as f32 }));
  }

  let feature = split_feature(object, feature_names)?;
  let threshold = first_float(object, &["split_condition", "threshold"])?;
  let yes = first_int(object, &["yes", "left_child"])?;
  let no = first_int(object, &["no", "right_child"])?;
  let missing = match object.get("missing") {
    Some(_) => first_int(object, &["missing"])?,
    None => yes,
  };

  Ok((
    id,
    TreeNode::Split {
      feature,
      threshold,
      yes,
      no,
      missing,
    },
  ))
}

/// 特征可为下标、`"f<下标>"` 或特征名
fn split_feature(object: &Map<String, Value>, feature_names: &[String]) -> Result<usize, TreeError> {
  let invalid = || TreeError::InvalidField("split".to_string());
  let value = ["split", "split_feature", "split_index"]
    .iter()
    .find_map(|key| object.get(*key))
    .ok_or_else(invalid)?;

  if let Some(index) = value.as_u64() {
    return Ok(index as usize);
  }
  let name = value.as_str().ok_or_else(invalid)?;
  if let Some(index) = feature_names.iter().position(|n| n == name) {
    return Ok(index);
  }
  name
    .strip_prefix('f')
    .and_then(|digits| digits.parse().ok())
    .ok_or_else(invalid)
}

fn first_int(object: &Map<String, Value>, keys: &[&str]) -> Result<i64, TreeError> {
  keys
    .iter()
    .find_map(|key| object.get(*key))
    .and_then(Value::as_i64)
    .ok_or_else(|| TreeError::InvalidField(keys[0].to_string()))
}

fn first_float(object: &Map<String, Value>, keys: &[&str]) -> Result<f32, TreeError> {
  keys
    .iter()
    .find_map(|key| object.get(*key))
    .and_then(Value::as_f64)
    .map(|v| v as f32)
    .ok_or_else(|| TreeError::InvalidField(keys[0].to_string()))
}

fn array<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a Vec<Value>, TreeError> {
  object
    .get(field)
    .and_then(Value::as_array)
    .ok_or_else(|| TreeError::InvalidField(field.to_string()))
}

fn int_array(object: &Map<String, Value>, field: &str) -> Result<Vec<i64>, TreeError> {
  array(object, field)?
    .iter()
    .map(|v| v.as_i64().ok_or_else(|| TreeError::InvalidField(field.to_string())))
    .collect()
}

fn float_array(object: &Map<String, Value>, field: &str) -> Result<Vec<f32>, TreeError> {
  array(object, field)?
    .iter()
    .map(|v| {
      v.as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| TreeError::InvalidField(field.to_string()))
    })
    .collect()
}

/// 接受布尔值或 0/1
fn bool_array(object: &Map<String, Value>, field: &str) -> Result<Vec<bool>, TreeError> {
  array(object, field)?
    .iter()
    .map(|v| match v {
      Value::Bool(b) => Ok(*b),
      Value::Number(n) => n
        .as_i64()
        .map(|n| n != 0)
        .ok_or_else(|| TreeError::InvalidField(field.to_string())),
      _ => Err(TreeError::InvalidField(field.to_string())),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_array_tree_model() {
    let model = json!({
      "learner": {
        "attributes": { "base_score": "[5E-1]" },
        "feature_names": ["eye", "skin_texture"],
        "gradient_booster": { "model": { "trees": [{
          "left_children": [1, -1, -1],
          "right_children": [2, -1, -1],
          "split_indices": [0, 0, 0],
          "split_conditions": [0.5, 0.0, 0.0],
          "default_left": [1, 0, 0],
          "node_types": [0, 1, 1],
          "leaf_values": [1.0, -1.0]
        }]}}
      }
    });
    let ensemble = parse_model(&model).unwrap();
    assert_eq!(ensemble.base_score(), 0.5);
    assert_eq!(ensemble.feature_names(), ["eye", "skin_texture"]);
    assert_eq!(ensemble.trees().len(), 1);
    assert_eq!(ensemble.predict(&[0.2]), 1.5);
    assert_eq!(ensemble.predict(&[0.8]), -0.5);
    assert_eq!(ensemble.predict(&[f32::NAN]), 1.5);
  }

  #[test]
  fn test_split_feature_outside_named_features_fails_load() {
    let model = json!({
      "learner": {
        "feature_names": ["eye"],
        "gradient_booster": { "model": { "trees": [{
          "left_children": [1, -1, -1],
          "right_children": [2, -1, -1],
          "split_indices": [99, 0, 0],
          "split_conditions": [0.5, 0.0, 0.0],
          "default_left": [1, 0, 0],
          "node_types": [0, 1, 1],
          "leaf_values": [1.0, -1.0]
        }]}}
      }
    });
    assert_eq!(
      parse_model(&model),
      Err(TreeError::FeatureOutOfRange {
        feature: 99,
        features: 1
      })
    );

    let node_model = json!({
      "learner": { "feature_names": ["eye", "skin_texture"] },
      "trees": [{ "nodes": [
        { "nodeid": 0, "split": "f2", "split_condition": 1.0, "yes": 1, "no": 2 },
        { "nodeid": 1, "leaf": 1.0 },
        { "nodeid": 2, "leaf": 2.0 }
      ]}]
    });
    assert!(matches!(
      parse_model(&node_model),
      Err(TreeError::FeatureOutOfRange { feature: 2, .. })
    ));
  }

  #[test]
  fn test_array_tree_without_node_types() {
    // 叶子由左孩子 -1 判定，叶子值来自 split_conditions
    let tree = json!({
      "left_children": [1, -1, -1],
      "right_children": [2, -1, -1],
      "split_indices": [0, 0, 0],
      "split_conditions": [0.5, 3.0, 4.0],
      "default_left": [false, false, false]
    });
    let tree = parse_tree(&tree, &[]).unwrap();
    assert_eq!(tree.evaluate(&[0.1]), 3.0);
    assert_eq!(tree.evaluate(&[f32::NAN]), 4.0);
  }

  #[test]
  fn test_node_object_tree() {
    let names = vec!["eye".to_string(), "skin_texture".to_string()];
    let tree = json!({
      "nodes": [
        { "nodeid": 0, "split": "skin_texture", "split_condition": 1.5, "yes": 1, "no": 2, "missing": 2 },
        { "nodeid": 1, "leaf": 0.25 },
        { "nodeid": 2, "split": "f0", "threshold": 2.5, "left_child": 3, "right_child": 4 },
        { "nodeid": 3, "leaf": 1.0 },
        { "nodeid": 4, "leaf": 2.0 }
      ]
    });
    let tree = parse_tree(&tree, &names).unwrap();
    assert_eq!(tree.evaluate(&[0.0, 1.0]), 0.25);
    assert_eq!(tree.evaluate(&[2.0, 3.0]), 1.0);
    assert_eq!(tree.evaluate(&[3.0, 3.0]), 2.0);
    // 节点 2 未给出 missing，默认走 yes
    assert_eq!(tree.evaluate(&[f32::NAN, f32::NAN]), 1.0);
  }

  #[test]
  fn test_nested_children_flattened() {
    let tree = json!({
      "nodes": [{
        "nodeid": 0, "split": 0, "split_condition": 0.5, "yes": 1, "no": 2, "missing": 1,
        "children": [
          { "nodeid": 1, "leaf": -0.5 },
          { "nodeid": 2, "leaf": 0.5 }
        ]
      }]
    });
    let tree = parse_tree(&tree, &[]).unwrap();
    assert_eq!(tree.evaluate(&[0.0]), -0.5);
    assert_eq!(tree.evaluate(&[1.0]), 0.5);
  }

  #[test]
  fn test_unknown_encoding() {
    assert_eq!(
      parse_tree(&json!({ "weights": [1, 2] }), &[]),
      Err(TreeError::UnknownEncoding)
    );
    let model = json!({ "learner": {}, "trees": [{ "weights": [] }] });
    assert_eq!(parse_model(&model), Err(TreeError::UnknownEncoding));
  }

  #[test]
  fn test_base_score_sources() {
    let model = json!({ "learner": { "learner_model_param": { "base_score": "0.25" } } });
    assert_eq!(parse_model(&model).unwrap().base_score(), 0.25);

    let model = json!({ "learner": { "base_score": 1.5 } });
    assert_eq!(parse_model(&model).unwrap().base_score(), 1.5);

    let model = json!({ "learner": { "attributes": { "base_score": "oops" } } });
    assert_eq!(parse_model(&model).unwrap().base_score(), 0.0);
  }

  #[test]
  fn test_model_without_trees() {
    let model = json!({ "learner": { "feature_names": ["eye"] } });
    let ensemble = parse_model(&model).unwrap();
    assert!(!ensemble.has_trees());
    assert_eq!(ensemble.feature_names().len(), 1);
    assert_eq!(parse_model(&json!({})), Err(TreeError::MissingLearner));
  }
}
