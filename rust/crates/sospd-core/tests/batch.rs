use std::sync::Arc;

use sospd_core::{
    solve_fusion_batch, DualGuidedFusionMove, Energy, FusionOptions, MultiLabelEnergy, NodeId,
    StereoClique, StereoParams,
};

/// One scanline choosing per pixel between a flat and a slanted disparity proposal.
fn scanline(width: usize, slope: f32) -> MultiLabelEnergy {
    let flat: Vec<f32> = vec![4.0; width];
    let slanted: Vec<f32> = (0..width).map(|x| 2.0 + slope * x as f32).collect();
    let proposals = Arc::new(vec![flat, slanted]);
    let mut e = MultiLabelEnergy::new(2).unwrap();
    e.add_node(width);
    for x in 0..width {
        let observed = 2.0 + slope * x as f32;
        let costs: Vec<Energy> = proposals
            .iter()
            .map(|p| ((p[x] - observed).abs() * 100.0) as Energy)
            .collect();
        e.add_unary_term(NodeId(x), &costs).unwrap();
    }
    let params = StereoParams {
        scale: 500.0,
        ..StereoParams::default()
    };
    for x in 0..width - 2 {
        let nodes = [NodeId(x), NodeId(x + 1), NodeId(x + 2)];
        e.add_clique(Box::new(StereoClique::new(nodes, Arc::clone(&proposals), params).unwrap()))
            .unwrap();
    }
    e
}

#[test]
fn fusion_batch_keeps_order_and_matches_sequential_runs() {
    let slopes = [0.0, 0.25, 0.5, 1.0, 0.1];
    let options = FusionOptions::default();
    let energies = slopes.iter().map(|&s| scanline(10, s)).collect();
    let outcomes = solve_fusion_batch(energies, &options);
    assert_eq!(outcomes.len(), slopes.len());

    for (&slope, outcome) in slopes.iter().zip(&outcomes) {
        let outcome = outcome.as_ref().unwrap();
        let mut sequential = DualGuidedFusionMove::new(scanline(10, slope), options.clone());
        sequential.solve().unwrap();
        assert_eq!(outcome.labels, sequential.labels());
        assert_eq!(outcome.energy, sequential.compute_energy());
        assert_eq!(outcome.stats.final_energy(), Some(outcome.energy));
    }
}

#[test]
fn stereo_fusion_never_exceeds_the_unary_start() {
    let energy = scanline(12, 0.5);
    let start = energy.compute_energy(&energy.unary_minimizer());
    let outcome = solve_fusion_batch(vec![energy], &FusionOptions::default())
        .pop()
        .unwrap()
        .unwrap();
    assert!(outcome.energy <= start);
}
