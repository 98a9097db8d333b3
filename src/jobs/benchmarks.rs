//! Deterministic SATLIB-style benchmark generators
//!
//! Every generator is a pure function of `(family, problem_index)`: the RNG
//! is seeded from the index, so a given problem is byte-identical across
//! hosts and runs. Output is valid DIMACS with a comment header naming the
//! family and index.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn seeded_rng(problem_index: u32) -> StdRng {
    StdRng::seed_from_u64(42 + problem_index as u64 * 1000)
}

/// Generate the DIMACS text for one benchmark problem.
///
/// Unknown families fall back to uniform random 3-SAT at the 50-variable
/// phase-transition ratio.
pub fn generate(benchmark_id: &str, problem_index: u32) -> String {
    match benchmark_id {
        "uf20-91" => uniform_random_3sat(20, 91, true, problem_index),
        "uf50-218" => uniform_random_3sat(50, 218, true, problem_index),
        "uuf50-218" => uniform_random_3sat(50, 218, false, problem_index),
        "uf100-430" => uniform_random_3sat(100, 430, true, problem_index),
        "uuf100-430" => uniform_random_3sat(100, 430, false, problem_index),
        "flat30-60" => graph_coloring(30, 60, 3, problem_index),
        "flat50-115" => graph_coloring(50, 115, 3, problem_index),
        "blocks-4-0" => blocks_world(4, problem_index),
        "logistics-a" => logistics("a", problem_index),
        id if id.starts_with("cbs-") => {
            let backbone = id
                .rsplit('-')
                .next()
                .and_then(|part| part.trim_start_matches(|c: char| c.is_alphabetic()).parse().ok())
                .unwrap_or(10);
            controlled_backbone(100, 403, backbone, problem_index)
        }
        id if id.starts_with("aim-") => {
            let parts: Vec<&str> = id.split('-').collect();
            let vars = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(50);
            let clauses = parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(80);
            aim(vars, clauses, id.contains("yes"), problem_index)
        }
        id if id.starts_with("dubois") => {
            let n = id
                .split('-')
                .nth(1)
                .and_then(|p| p.parse().ok())
                .unwrap_or(20);
            dubois(n, problem_index)
        }
        id if id.starts_with("hole") => {
            let parts: Vec<&str> = id.split('-').collect();
            let pigeons = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(6);
            let holes = parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(5);
            pigeonhole(pigeons, holes, problem_index)
        }
        _ => uniform_random_3sat(50, 218, true, problem_index),
    }
}

fn render(header: &str, problem_index: u32, num_vars: usize, clauses: &[Vec<i32>]) -> String {
    let mut out = String::new();
    out.push_str(&format!("c {header}\n"));
    out.push_str(&format!("c Problem index: {problem_index}\n"));
    out.push_str(&format!("p cnf {num_vars} {}\n", clauses.len()));
    for clause in clauses {
        for lit in clause {
            out.push_str(&format!("{lit} "));
        }
        out.push_str("0\n");
    }
    out
}

/// Pick three distinct variables with random polarity
fn random_3clause(rng: &mut StdRng, num_vars: usize) -> Vec<i32> {
    let mut vars = Vec::with_capacity(3);
    while vars.len() < 3 {
        let v = rng.gen_range(1..=num_vars as i32);
        if !vars.contains(&v) {
            vars.push(v);
        }
    }
    vars.into_iter()
        .map(|v| if rng.gen::<f64>() < 0.5 { -v } else { v })
        .collect()
}

fn uniform_random_3sat(
    num_vars: usize,
    num_clauses: usize,
    satisfiable: bool,
    problem_index: u32,
) -> String {
    let mut rng = seeded_rng(problem_index);
    let mut clauses: Vec<Vec<i32>> = (0..num_clauses)
        .map(|_| random_3clause(&mut rng, num_vars))
        .collect();

    // Force a contradiction for the unsatisfiable families
    if !satisfiable && num_vars >= 1 {
        clauses.push(vec![1]);
        clauses.push(vec![-1]);
    }

    let label = if satisfiable { "SAT" } else { "UNSAT" };
    render(
        &format!(
            "Uniform Random 3-SAT ({num_vars} vars, {} clauses, {label})",
            clauses.len()
        ),
        problem_index,
        num_vars,
        &clauses,
    )
}

fn graph_coloring(vertices: usize, edges: usize, colors: usize, problem_index: u32) -> String {
    let mut rng = seeded_rng(problem_index);
    let num_vars = vertices * colors;

    let mut edge_list: Vec<(usize, usize)> = Vec::new();
    while edge_list.len() < edges {
        let v1 = rng.gen_range(0..vertices);
        let v2 = rng.gen_range(0..vertices);
        if v1 != v2 && !edge_list.contains(&(v1, v2)) && !edge_list.contains(&(v2, v1)) {
            edge_list.push((v1, v2));
        }
    }

    // Variable encoding: vertex * colors + color + 1
    let var = |v: usize, c: usize| (v * colors + c + 1) as i32;
    let mut clauses = Vec::new();

    // At least one color per vertex
    for v in 0..vertices {
        clauses.push((0..colors).map(|c| var(v, c)).collect());
    }
    // At most one color per vertex
    for v in 0..vertices {
        for c1 in 0..colors {
            for c2 in c1 + 1..colors {
                clauses.push(vec![-var(v, c1), -var(v, c2)]);
            }
        }
    }
    // Endpoints of an edge differ
    for &(v1, v2) in &edge_list {
        for c in 0..colors {
            clauses.push(vec![-var(v1, c), -var(v2, c)]);
        }
    }

    render(
        &format!("Graph Coloring ({vertices} vertices, {colors}-colorable, {edges} edges)"),
        problem_index,
        num_vars,
        &clauses,
    )
}

fn controlled_backbone(
    num_vars: usize,
    num_clauses: usize,
    backbone_size: usize,
    problem_index: u32,
) -> String {
    let mut rng = seeded_rng(problem_index);

    // Forced assignments first
    let mut backbone_vars = Vec::with_capacity(backbone_size);
    while backbone_vars.len() < backbone_size.min(num_vars) {
        let v = rng.gen_range(1..=num_vars as i32);
        if !backbone_vars.contains(&v) {
            backbone_vars.push(v);
        }
    }

    let mut clauses: Vec<Vec<i32>> = backbone_vars
        .iter()
        .map(|&v| vec![if rng.gen_bool(0.5) { v } else { -v }])
        .collect();

    while clauses.len() < num_clauses {
        clauses.push(random_3clause(&mut rng, num_vars));
    }

    render(
        &format!("Controlled Backbone (backbone size {backbone_size}, {num_vars} vars)"),
        problem_index,
        num_vars,
        &clauses,
    )
}

fn blocks_world(blocks: usize, problem_index: u32) -> String {
    let num_vars = blocks * blocks * 2;
    let mut clauses: Vec<Vec<i32>> = Vec::new();

    // Each block must be somewhere
    for i in 0..blocks {
        clauses.push((0..blocks).map(|j| (i * blocks + j + 1) as i32).collect());
    }
    // Position exclusions
    for i in 0..blocks - 1 {
        clauses.push(vec![-((i * blocks + 1) as i32), -((i * blocks + 2) as i32)]);
    }

    render(
        &format!("Blocks World ({blocks} blocks)"),
        problem_index,
        num_vars,
        &clauses,
    )
}

fn logistics(kind: &str, problem_index: u32) -> String {
    let num_vars = 50;
    let mut clauses = Vec::new();
    for i in 1..num_vars / 2 {
        let i = i as i32;
        let half = (num_vars / 2) as i32;
        clauses.push(vec![i, i + half]);
        clauses.push(vec![-i, -(i + half)]);
    }

    render(
        &format!("Logistics Planning (type {kind})"),
        problem_index,
        num_vars,
        &clauses,
    )
}

fn aim(num_vars: usize, num_clauses: usize, satisfiable: bool, problem_index: u32) -> String {
    let mut rng = seeded_rng(problem_index);
    let mut clauses: Vec<Vec<i32>> = (0..num_clauses)
        .map(|_| random_3clause(&mut rng, num_vars))
        .collect();

    if !satisfiable {
        clauses.push(vec![1]);
        clauses.push(vec![-1]);
    }

    let label = if satisfiable { "SAT" } else { "UNSAT" };
    render(
        &format!("AIM ({num_vars} vars, {label})"),
        problem_index,
        num_vars,
        &clauses,
    )
}

fn dubois(n: usize, problem_index: u32) -> String {
    let num_vars = 3 * n;
    let mut clauses = Vec::new();

    for i in 0..n {
        let base = (i * 3) as i32;
        clauses.push(vec![base + 1, base + 2]);
        clauses.push(vec![base + 1, base + 3]);
        clauses.push(vec![base + 2, base + 3]);
        clauses.push(vec![-(base + 1), -(base + 2)]);
        clauses.push(vec![-(base + 1), -(base + 3)]);
        clauses.push(vec![-(base + 2), -(base + 3)]);
    }
    // Cycle constraint closes the contradiction
    if n > 1 {
        clauses.push(vec![1, -((3 * n) as i32)]);
    }

    render(
        &format!("Dubois UNSAT (n={n})"),
        problem_index,
        num_vars,
        &clauses,
    )
}

fn pigeonhole(pigeons: usize, holes: usize, problem_index: u32) -> String {
    let num_vars = pigeons * holes;
    let var = |p: usize, h: usize| (p * holes + h + 1) as i32;
    let mut clauses = Vec::new();

    // Each pigeon sits in some hole
    for p in 0..pigeons {
        clauses.push((0..holes).map(|h| var(p, h)).collect());
    }
    // No two pigeons share a hole
    for h in 0..holes {
        for p1 in 0..pigeons {
            for p2 in p1 + 1..pigeons {
                clauses.push(vec![-var(p1, h), -var(p2, h)]);
            }
        }
    }

    let label = if pigeons > holes { "UNSAT" } else { "SAT" };
    render(
        &format!("Pigeonhole ({pigeons} pigeons, {holes} holes, {label})"),
        problem_index,
        num_vars,
        &clauses,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::protocol::parse_cnf_header;
    use crate::jobs::solvers::{parse_dimacs, DpllSolver};

    #[test]
    fn test_generators_are_deterministic() {
        for family in [
            "uf20-91",
            "uf50-218",
            "uuf50-218",
            "flat30-60",
            "cbs-k3-n100-m403-b10",
            "aim-50-80-yes",
            "dubois-4",
            "hole-6-5",
        ] {
            let a = generate(family, 3);
            let b = generate(family, 3);
            assert_eq!(a, b, "family {family} is not reproducible");
        }
    }

    #[test]
    fn test_different_indices_differ() {
        assert_ne!(generate("uf20-91", 1), generate("uf20-91", 2));
    }

    #[test]
    fn test_header_matches_body() {
        for family in ["uf20-91", "uf50-218", "flat30-60", "hole-6-5"] {
            let dimacs = generate(family, 1);
            let (vars, clauses) = parse_cnf_header(&dimacs).unwrap();
            let (parsed_vars, parsed_clauses) = parse_dimacs(&dimacs);
            assert_eq!(vars as usize, parsed_vars);
            assert_eq!(clauses as usize, parsed_clauses.len());
            assert!(dimacs.starts_with("c "));
            assert!(dimacs.contains("Problem index: 1"));
        }
    }

    #[test]
    fn test_clauses_stay_in_variable_range() {
        let dimacs = generate("uf20-91", 5);
        let (vars, clauses) = parse_dimacs(&dimacs);
        for clause in &clauses {
            assert_eq!(clause.len(), 3);
            for &lit in clause {
                assert!(lit != 0 && lit.unsigned_abs() as usize <= vars);
            }
        }
    }

    #[test]
    fn test_uuf_family_is_unsatisfiable() {
        let dimacs = generate("uuf50-218", 1);
        let mut solver = DpllSolver::new();
        let (satisfiable, _) = solver.solve(&dimacs);
        assert!(!satisfiable);
    }

    #[test]
    fn test_pigeonhole_is_unsatisfiable() {
        let dimacs = generate("hole-4-3", 1);
        let mut solver = DpllSolver::new();
        let (satisfiable, _) = solver.solve(&dimacs);
        assert!(!satisfiable);
    }

    #[test]
    fn test_unknown_family_falls_back() {
        let dimacs = generate("mystery-benchmark", 1);
        let (vars, _) = parse_cnf_header(&dimacs).unwrap();
        assert_eq!(vars, 50);
    }
}
