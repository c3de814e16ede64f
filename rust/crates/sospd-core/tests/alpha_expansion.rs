use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sospd_core::{
    AlphaExpansion, AlphaExpansionOptions, DualGuidedFusionMove, Energy, FusionOptions,
    MultiLabelEnergy, NodeId, PottsClique, ProposalStrategy, SolverKind,
};

fn noisy_grid(
    rng: &mut StdRng,
    width: usize,
    height: usize,
    num_labels: usize,
) -> MultiLabelEnergy {
    let mut e = MultiLabelEnergy::new(num_labels).unwrap();
    e.add_node(width * height);
    for i in 0..width * height {
        let costs: Vec<Energy> = (0..num_labels).map(|_| rng.gen_range(0..=10)).collect();
        e.add_unary_term(NodeId(i), &costs).unwrap();
    }
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if x + 1 < width {
                let nodes = vec![NodeId(i), NodeId(i + 1)];
                e.add_clique(Box::new(PottsClique::new(nodes, 0, 4).unwrap())).unwrap();
            }
            if y + 1 < height {
                let nodes = vec![NodeId(i), NodeId(i + width)];
                e.add_clique(Box::new(PottsClique::new(nodes, 0, 4).unwrap())).unwrap();
            }
        }
    }
    e
}

#[test]
fn both_flow_solvers_drive_the_expansion() {
    let mut rng = StdRng::seed_from_u64(3);
    let energy = noisy_grid(&mut rng, 6, 5, 4);
    let mut rng = StdRng::seed_from_u64(3);
    let same_energy = noisy_grid(&mut rng, 6, 5, 4);

    let mut ibfs = AlphaExpansion::new(energy, AlphaExpansionOptions::default());
    let ibfs_stats = ibfs.solve().unwrap();
    let options = AlphaExpansionOptions {
        solver: SolverKind::PushRelabel,
        ..AlphaExpansionOptions::default()
    };
    let mut push_relabel = AlphaExpansion::new(same_energy, options);
    let pr_stats = push_relabel.solve().unwrap();

    assert_eq!(ibfs_stats.initial_energy, pr_stats.initial_energy);
    assert_eq!(ibfs_stats.relaxed_cliques, 0);
    assert_eq!(pr_stats.relaxed_cliques, 0);
    assert!(ibfs_stats.final_energy <= ibfs_stats.initial_energy);
    assert!(pr_stats.final_energy <= pr_stats.initial_energy);
    assert_eq!(ibfs_stats.final_energy, ibfs.compute_energy());
    assert_eq!(pr_stats.final_energy, push_relabel.compute_energy());
}

#[test]
fn expansion_and_fusion_improve_on_the_start() {
    let mut rng = StdRng::seed_from_u64(17);
    let energy = noisy_grid(&mut rng, 5, 5, 3);
    let start = energy.compute_energy(&energy.unary_minimizer());

    let mut rng = StdRng::seed_from_u64(17);
    let energy = noisy_grid(&mut rng, 5, 5, 3);
    let mut fusion = DualGuidedFusionMove::new(energy, FusionOptions::default());
    fusion.set_proposal(ProposalStrategy::AlphaExpansion);
    fusion.solve().unwrap();
    assert!(fusion.compute_energy() <= start);

    // expansion warm-started from the fusion result can only refine it
    let mut rng = StdRng::seed_from_u64(17);
    let energy = noisy_grid(&mut rng, 5, 5, 3);
    let mut expansion = AlphaExpansion::new(energy, AlphaExpansionOptions::default());
    expansion.set_labels(fusion.labels()).unwrap();
    let stats = expansion.solve().unwrap();
    assert_eq!(stats.initial_energy, fusion.compute_energy());
    assert!(stats.final_energy <= stats.initial_energy);
    assert!(expansion.set_labels(&[0; 3]).is_err());
}

#[test]
fn round_limit_is_respected() {
    let mut rng = StdRng::seed_from_u64(8);
    let options = AlphaExpansionOptions {
        max_rounds: 1,
        ..AlphaExpansionOptions::default()
    };
    let mut ae = AlphaExpansion::new(noisy_grid(&mut rng, 4, 4, 5), options);
    let stats = ae.solve().unwrap();
    assert_eq!(stats.rounds, 1);
    assert_eq!(stats.final_energy, ae.compute_energy());
}
