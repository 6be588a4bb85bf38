//! Graph post-filters (§4.12): threshold selection and ranked top-k composition over an
//! already-generated [`crate::aag::AagGraph`].

use std::collections::HashSet;

use crate::aag::{AagEdge, AagGraph, AagNode};

/// Whether a threshold must hold for every group (`All`) or just one (`Any`) when a
/// parameter is per-group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Any,
    All,
}

/// Valid `param` names for a node [`ThresholdParamFilter`] (§4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeParam {
    Prevalence,
    MissingRatio,
    /// Scalar (not per-group); `mode` has no effect on this param.
    PrevalenceDifference,
    /// Scalar (not per-group); `mode` has no effect on this param.
    PrevalenceRatio,
}

/// Valid `param` names for an edge [`ThresholdParamFilter`] (§4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeParam {
    CoOccurrence,
    ConditionalPrevalence,
    ConditionalIncrease,
    IncreaseRatio,
}

fn within_bounds(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

fn apply_mode(values: &[f64], mode: FilterMode, min: Option<f64>, max: Option<f64>) -> bool {
    if values.is_empty() {
        return false;
    }
    match mode {
        FilterMode::Any => values.iter().any(|&v| within_bounds(v, min, max)),
        FilterMode::All => values.iter().all(|&v| within_bounds(v, min, max)),
    }
}

fn node_param_values(node: &AagNode, param: NodeParam) -> Vec<f64> {
    match param {
        NodeParam::Prevalence => node.stats.prevalence.values().copied().collect(),
        NodeParam::MissingRatio => node.stats.missing_ratio.values().copied().collect(),
        NodeParam::PrevalenceDifference => vec![node.stats.prevalence_difference],
        NodeParam::PrevalenceRatio => vec![node.stats.prevalence_ratio],
    }
}

fn edge_param_values(edge: &AagEdge, param: EdgeParam) -> Vec<f64> {
    match param {
        EdgeParam::CoOccurrence => edge.stats.co_occurrence.values().map(|&v| v as f64).collect(),
        EdgeParam::ConditionalPrevalence => edge.stats.conditional_prevalence.values().copied().collect(),
        EdgeParam::ConditionalIncrease => edge.stats.conditional_increase.values().copied().collect(),
        EdgeParam::IncreaseRatio => edge.stats.increase_ratio.values().copied().collect(),
    }
}

/// `ThresholdParamFilter(param, min?, max?, mode)` of §4.12.
#[derive(Debug, Clone)]
pub struct ThresholdParamFilter<P> {
    pub param: P,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mode: FilterMode,
}

impl ThresholdParamFilter<NodeParam> {
    pub fn matches(&self, node: &AagNode) -> bool {
        apply_mode(&node_param_values(node, self.param), self.mode, self.min, self.max)
    }
}

impl ThresholdParamFilter<EdgeParam> {
    pub fn matches(&self, edge: &AagEdge) -> bool {
        apply_mode(&edge_param_values(edge, self.param), self.mode, self.min, self.max)
    }
}

/// A boolean composition of node threshold filters (`AndCascade`/`OrCascade`, §4.12).
#[derive(Debug, Clone)]
pub enum NodeFilter {
    Threshold(ThresholdParamFilter<NodeParam>),
    AndCascade(Vec<NodeFilter>),
    OrCascade(Vec<NodeFilter>),
}

impl NodeFilter {
    pub fn matches(&self, node: &AagNode) -> bool {
        match self {
            NodeFilter::Threshold(t) => t.matches(node),
            NodeFilter::AndCascade(subs) => subs.iter().all(|f| f.matches(node)),
            NodeFilter::OrCascade(subs) => subs.iter().any(|f| f.matches(node)),
        }
    }
}

/// A boolean composition of edge threshold filters (`AndCascade`/`OrCascade`, §4.12).
#[derive(Debug, Clone)]
pub enum EdgeFilter {
    Threshold(ThresholdParamFilter<EdgeParam>),
    AndCascade(Vec<EdgeFilter>),
    OrCascade(Vec<EdgeFilter>),
}

impl EdgeFilter {
    pub fn matches(&self, edge: &AagEdge) -> bool {
        match self {
            EdgeFilter::Threshold(t) => t.matches(edge),
            EdgeFilter::AndCascade(subs) => subs.iter().all(|f| f.matches(edge)),
            EdgeFilter::OrCascade(subs) => subs.iter().any(|f| f.matches(edge)),
        }
    }
}

/// Drops every node rejected by `node_filter` and every edge rejected by `edge_filter` or
/// left dangling by a dropped endpoint.
pub fn apply_threshold_filters(graph: &AagGraph, node_filter: Option<&NodeFilter>, edge_filter: Option<&EdgeFilter>) -> AagGraph {
    let nodes: Vec<AagNode> = graph
        .nodes
        .iter()
        .filter(|n| node_filter.map_or(true, |f| f.matches(n)))
        .cloned()
        .collect();
    let surviving_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    let edges: Vec<AagEdge> = graph
        .edges
        .iter()
        .filter(|e| surviving_ids.contains(e.source_id.as_str()) && surviving_ids.contains(e.target_id.as_str()))
        .filter(|e| edge_filter.map_or(true, |f| f.matches(e)))
        .cloned()
        .collect();

    AagGraph { nodes, edges }
}

/// The three-way composition ratio of §4.12: `freq`/`diff`/`ratio` for nodes, or
/// `cond_prev`/`cond_incr`/`incr_ratio` for edges. Must sum to 1.0.
pub type CompositionRatio = (f64, f64, f64);

/// Configuration for [`apply_composition_filter`] (§4.12, §4.14).
#[derive(Debug, Clone)]
pub struct CompositionPostFilterConfig {
    pub min_prevalence: Option<f64>,
    pub min_prevalence_mode: FilterMode,
    pub max_missing: Option<f64>,
    pub max_missing_mode: FilterMode,
    pub min_cond_prevalence: Option<f64>,
    pub min_cond_prevalence_mode: FilterMode,
    pub perc_nof_nodes: f64,
    pub max_nof_nodes: usize,
    pub node_composition_ratio: CompositionRatio,
    pub perc_nof_edges: f64,
    pub max_nof_edges: usize,
    pub edge_composition_ratio: CompositionRatio,
    pub include_conditional_decrease: bool,
}

impl Default for CompositionPostFilterConfig {
    fn default() -> Self {
        Self {
            min_prevalence: None,
            min_prevalence_mode: FilterMode::All,
            max_missing: None,
            max_missing_mode: FilterMode::All,
            min_cond_prevalence: None,
            min_cond_prevalence_mode: FilterMode::All,
            perc_nof_nodes: 1.0,
            max_nof_nodes: usize::MAX,
            node_composition_ratio: (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0),
            perc_nof_edges: 1.0,
            max_nof_edges: usize::MAX,
            edge_composition_ratio: (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0),
            include_conditional_decrease: false,
        }
    }
}

fn split_budget(total: usize, ratio: CompositionRatio) -> (usize, usize, usize) {
    let a = ((total as f64) * ratio.0).round() as usize;
    let b = ((total as f64) * ratio.1).round() as usize;
    let c = total.saturating_sub(a).saturating_sub(b);
    (a, b, c)
}

fn top_k_by<'a, T>(items: &[&'a T], k: usize, key: impl Fn(&T) -> f64) -> HashSet<*const T> {
    let mut sorted: Vec<&T> = items.to_vec();
    sorted.sort_by(|a, b| key(*b).partial_cmp(&key(*a)).unwrap_or(std::cmp::Ordering::Equal));
    sorted.into_iter().take(k).map(|v| v as *const T).collect()
}

fn node_max_prevalence(node: &AagNode) -> f64 {
    node.stats.prevalence.values().cloned().fold(0.0f64, f64::max)
}

fn edge_representative_cond_prevalence(edge: &AagEdge) -> f64 {
    edge.stats.conditional_prevalence.values().cloned().fold(f64::NEG_INFINITY, f64::max).max(0.0)
}

fn edge_representative_cond_increase(edge: &AagEdge, include_conditional_decrease: bool) -> f64 {
    let values = edge.stats.conditional_increase.values();
    if include_conditional_decrease {
        values.map(|v| v.abs()).fold(0.0f64, f64::max)
    } else {
        values.cloned().fold(f64::NEG_INFINITY, f64::max).max(0.0)
    }
}

fn edge_representative_increase_ratio(edge: &AagEdge, include_conditional_decrease: bool) -> f64 {
    let values = edge.stats.increase_ratio.values();
    if include_conditional_decrease {
        values.map(|&v| v.max(1.0 / v)).fold(1.0f64, f64::max)
    } else {
        values.cloned().fold(1.0f64, f64::max)
    }
}

/// Runs the two-stage composition post-filter of §4.12: threshold drop, then ranked
/// top-k selection by a three-way composition ratio.
pub fn apply_composition_filter(graph: &AagGraph, config: &CompositionPostFilterConfig) -> AagGraph {
    let mut node_filters = Vec::new();
    if config.min_prevalence.is_some() {
        node_filters.push(NodeFilter::Threshold(ThresholdParamFilter {
            param: NodeParam::Prevalence,
            min: config.min_prevalence,
            max: None,
            mode: config.min_prevalence_mode,
        }));
    }
    if config.max_missing.is_some() {
        node_filters.push(NodeFilter::Threshold(ThresholdParamFilter {
            param: NodeParam::MissingRatio,
            min: None,
            max: config.max_missing,
            mode: config.max_missing_mode,
        }));
    }
    let node_filter = if node_filters.is_empty() {
        None
    } else {
        Some(NodeFilter::AndCascade(node_filters))
    };

    let edge_filter = config.min_cond_prevalence.map(|min| {
        EdgeFilter::Threshold(ThresholdParamFilter {
            param: EdgeParam::ConditionalPrevalence,
            min: Some(min),
            max: None,
            mode: config.min_cond_prevalence_mode,
        })
    });

    let stage1 = apply_threshold_filters(graph, node_filter.as_ref(), edge_filter.as_ref());

    let node_refs: Vec<&AagNode> = stage1.nodes.iter().collect();
    let node_target = (((node_refs.len() as f64) * config.perc_nof_nodes).floor() as usize).min(config.max_nof_nodes);
    let (freq_k, diff_k, ratio_k) = split_budget(node_target, config.node_composition_ratio);
    let mut keep_nodes: HashSet<*const AagNode> = HashSet::new();
    keep_nodes.extend(top_k_by(&node_refs, freq_k, node_max_prevalence));
    keep_nodes.extend(top_k_by(&node_refs, diff_k, |n| n.stats.prevalence_difference));
    keep_nodes.extend(top_k_by(&node_refs, ratio_k, |n| n.stats.prevalence_ratio));

    let nodes: Vec<AagNode> = stage1
        .nodes
        .iter()
        .filter(|n| keep_nodes.contains(&(*n as *const AagNode)))
        .cloned()
        .collect();
    let surviving_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let surviving_edges: Vec<&AagEdge> = stage1
        .edges
        .iter()
        .filter(|e| surviving_ids.contains(e.source_id.as_str()) && surviving_ids.contains(e.target_id.as_str()))
        .collect();

    let edge_target = (((surviving_edges.len() as f64) * config.perc_nof_edges).floor() as usize).min(config.max_nof_edges);
    let (cp_k, ci_k, ir_k) = split_budget(edge_target, config.edge_composition_ratio);
    let decr = config.include_conditional_decrease;
    let mut keep_edges: HashSet<*const AagEdge> = HashSet::new();
    keep_edges.extend(top_k_by(&surviving_edges, cp_k, edge_representative_cond_prevalence));
    keep_edges.extend(top_k_by(&surviving_edges, ci_k, |e| edge_representative_cond_increase(e, decr)));
    keep_edges.extend(top_k_by(&surviving_edges, ir_k, |e| edge_representative_increase_ratio(e, decr)));

    let edges: Vec<AagEdge> = surviving_edges
        .into_iter()
        .filter(|e| keep_edges.contains(&(*e as *const AagEdge)))
        .cloned()
        .collect();

    AagGraph { nodes, edges }
}
