//! Software SAT solver stubs
//!
//! Reference solvers the campaigns compare the hardware against. Their
//! timing and outcome are reported as-is; neither is tuned for speed.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Parse DIMACS CNF into `(num_vars, clauses)`, ignoring comments
pub fn parse_dimacs(dimacs: &str) -> (usize, Vec<Vec<i32>>) {
    let mut num_vars = 0;
    let mut clauses = Vec::new();

    for line in dimacs.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('c') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("p cnf") {
            num_vars = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            continue;
        }
        let clause: Vec<i32> = line
            .split_whitespace()
            .filter_map(|tok| tok.parse().ok())
            .take_while(|&lit| lit != 0)
            .collect();
        if !clause.is_empty() {
            clauses.push(clause);
        }
    }

    (num_vars, clauses)
}

/// DPLL with unit propagation and chronological backtracking
pub struct DpllSolver {
    pub propagations: u64,
    pub decisions: u64,
    pub conflicts: u64,
    num_vars: usize,
    clauses: Vec<Vec<i32>>,
    assignment: HashMap<u32, bool>,
}

impl DpllSolver {
    pub fn new() -> Self {
        DpllSolver {
            propagations: 0,
            decisions: 0,
            conflicts: 0,
            num_vars: 0,
            clauses: Vec::new(),
            assignment: HashMap::new(),
        }
    }

    /// Returns satisfiability and, when SAT, a full literal assignment
    /// (unassigned variables default to true)
    pub fn solve(&mut self, dimacs: &str) -> (bool, Option<Vec<i32>>) {
        let (num_vars, clauses) = parse_dimacs(dimacs);
        self.num_vars = num_vars;
        self.clauses = clauses;
        self.assignment.clear();

        if self.dpll() {
            let assignment = (1..=num_vars as u32)
                .map(|v| match self.assignment.get(&v) {
                    Some(false) => -(v as i32),
                    _ => v as i32,
                })
                .collect();
            (true, Some(assignment))
        } else {
            (false, None)
        }
    }

    fn dpll(&mut self) -> bool {
        if self.unit_propagate() {
            self.conflicts += 1;
            return false;
        }

        if self.all_satisfied() {
            return true;
        }

        let var = match self.choose_variable() {
            Some(var) => var,
            None => return true,
        };
        self.decisions += 1;

        let saved = self.assignment.clone();
        self.assignment.insert(var, true);
        if self.dpll() {
            return true;
        }

        self.assignment = saved;
        self.assignment.insert(var, false);
        self.dpll()
    }

    fn literal_value(&self, lit: i32) -> Option<bool> {
        self.assignment
            .get(&(lit.unsigned_abs()))
            .map(|&v| if lit > 0 { v } else { !v })
    }

    /// Returns true on conflict
    fn unit_propagate(&mut self) -> bool {
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..self.clauses.len() {
                let mut unassigned = None;
                let mut unassigned_count = 0;
                let mut satisfied = false;

                for &lit in &self.clauses[i] {
                    match self.literal_value(lit) {
                        Some(true) => {
                            satisfied = true;
                            break;
                        }
                        Some(false) => {}
                        None => {
                            unassigned = Some(lit);
                            unassigned_count += 1;
                        }
                    }
                }

                if satisfied {
                    continue;
                }
                match unassigned_count {
                    0 => return true,
                    1 => {
                        let lit = unassigned.unwrap_or(0);
                        self.assignment.insert(lit.unsigned_abs(), lit > 0);
                        self.propagations += 1;
                        changed = true;
                    }
                    _ => {}
                }
            }
        }
        false
    }

    fn all_satisfied(&self) -> bool {
        self.clauses.iter().all(|clause| {
            clause
                .iter()
                .any(|&lit| self.literal_value(lit) == Some(true))
        })
    }

    fn choose_variable(&self) -> Option<u32> {
        (1..=self.num_vars as u32).find(|v| !self.assignment.contains_key(v))
    }
}

impl Default for DpllSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// WalkSAT local search with random restarts
pub struct WalkSatSolver {
    max_flips: usize,
    noise: f64,
    restart_budget: u32,
    pub total_flips: u64,
    pub restarts: u32,
    rng: StdRng,
}

impl WalkSatSolver {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Seeded construction for reproducible runs
    pub fn with_seed(seed: u64) -> Self {
        WalkSatSolver {
            max_flips: 100_000,
            noise: 0.5,
            restart_budget: 10,
            total_flips: 0,
            restarts: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn solve(&mut self, dimacs: &str) -> (bool, Option<Vec<i32>>) {
        let (num_vars, clauses) = parse_dimacs(dimacs);
        if num_vars == 0 {
            return (false, None);
        }
        let flips_per_restart = self.max_flips / self.restart_budget as usize;

        for restart in 0..self.restart_budget {
            self.restarts = restart;

            let mut assignment: Vec<bool> =
                (0..num_vars).map(|_| self.rng.gen_bool(0.5)).collect();

            for _ in 0..flips_per_restart {
                self.total_flips += 1;

                let unsat: Vec<usize> = (0..clauses.len())
                    .filter(|&i| !clause_satisfied(&clauses[i], &assignment))
                    .collect();
                if unsat.is_empty() {
                    let result = (1..=num_vars as i32)
                        .map(|v| if assignment[v as usize - 1] { v } else { -v })
                        .collect();
                    return (true, Some(result));
                }

                let clause = &clauses[unsat[self.rng.gen_range(0..unsat.len())]];
                let var = if self.rng.gen::<f64>() < self.noise {
                    // Random walk
                    clause[self.rng.gen_range(0..clause.len())].unsigned_abs() as usize
                } else {
                    // Greedy: flip the variable breaking the fewest clauses
                    let mut best = clause[0].unsigned_abs() as usize;
                    let mut best_breaks = usize::MAX;
                    for &lit in clause {
                        let candidate = lit.unsigned_abs() as usize;
                        let breaks = count_breaks(&clauses, &assignment, candidate);
                        if breaks < best_breaks {
                            best_breaks = breaks;
                            best = candidate;
                        }
                    }
                    best
                };

                assignment[var - 1] = !assignment[var - 1];
            }
        }

        (false, None)
    }
}

impl Default for WalkSatSolver {
    fn default() -> Self {
        Self::new()
    }
}

fn literal_satisfied(lit: i32, assignment: &[bool]) -> bool {
    let value = assignment[lit.unsigned_abs() as usize - 1];
    if lit > 0 {
        value
    } else {
        !value
    }
}

fn clause_satisfied(clause: &[i32], assignment: &[bool]) -> bool {
    clause.iter().any(|&lit| literal_satisfied(lit, assignment))
}

/// Clauses currently satisfied only by `var` that flipping it would break
fn count_breaks(clauses: &[Vec<i32>], assignment: &[bool], var: usize) -> usize {
    clauses
        .iter()
        .filter(|clause| {
            let mut sat_count = 0;
            let mut sat_by_var = false;
            for &lit in clause.iter() {
                if literal_satisfied(lit, assignment) {
                    sat_count += 1;
                    if lit.unsigned_abs() as usize == var {
                        sat_by_var = true;
                    }
                }
            }
            sat_count == 1 && sat_by_var
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_SAT: &str = "p cnf 3 2\n1 2 0\n-1 3 0\n";
    const SIMPLE_UNSAT: &str = "p cnf 1 2\n1 0\n-1 0\n";

    #[test]
    fn test_parse_dimacs() {
        let (vars, clauses) = parse_dimacs("c a comment\np cnf 3 2\n1 2 0\n-1 3 0\n");
        assert_eq!(vars, 3);
        assert_eq!(clauses, vec![vec![1, 2], vec![-1, 3]]);
    }

    #[test]
    fn test_dpll_satisfiable() {
        let mut solver = DpllSolver::new();
        let (satisfiable, assignment) = solver.solve(SIMPLE_SAT);
        assert!(satisfiable);

        // The returned assignment really satisfies every clause
        let assignment = assignment.unwrap();
        let values: Vec<bool> = assignment.iter().map(|&lit| lit > 0).collect();
        let (_, clauses) = parse_dimacs(SIMPLE_SAT);
        for clause in clauses {
            assert!(clause_satisfied(&clause, &values));
        }
    }

    #[test]
    fn test_dpll_unsatisfiable() {
        let mut solver = DpllSolver::new();
        let (satisfiable, assignment) = solver.solve(SIMPLE_UNSAT);
        assert!(!satisfiable);
        assert!(assignment.is_none());
        assert!(solver.conflicts > 0);
    }

    #[test]
    fn test_dpll_counts_propagations() {
        let mut solver = DpllSolver::new();
        // Chain of unit implications: 1, then 2, then 3
        solver.solve("p cnf 3 3\n1 0\n-1 2 0\n-2 3 0\n");
        assert!(solver.propagations >= 3);
    }

    #[test]
    fn test_walksat_finds_satisfying_assignment() {
        let mut solver = WalkSatSolver::with_seed(7);
        let (satisfiable, assignment) = solver.solve(SIMPLE_SAT);
        assert!(satisfiable);

        let values: Vec<bool> = assignment.unwrap().iter().map(|&lit| lit > 0).collect();
        let (_, clauses) = parse_dimacs(SIMPLE_SAT);
        for clause in clauses {
            assert!(clause_satisfied(&clause, &values));
        }
    }

    #[test]
    fn test_walksat_gives_up_on_unsat() {
        // WalkSAT is incomplete, so UNSAT shows up as exhaustion
        let mut solver = WalkSatSolver::with_seed(7);
        let (satisfiable, _) = solver.solve(SIMPLE_UNSAT);
        assert!(!satisfiable);
        assert!(solver.total_flips > 0);
    }
}
