//! Entity resolution: collapse near-duplicate entity names before graph build.
//!
//! Raw triples name the same real-world entity in many ways: casing variants,
//! acronyms, and long-form/short-form pairs. The resolver clusters endpoint
//! names and rewrites every triple onto one canonical name per cluster.
//!
//! The pass is deterministic for a fixed input, monotone (never produces more
//! triples than it was given), and idempotent. Over- or under-merging is a
//! quality tradeoff, not an error: nothing in here fails.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use rayon::prelude::*;

use crate::triple::{Triple, UNKNOWN_TYPE};

/// Connective words skipped when forming acronyms (Portuguese and English).
const STOP_WORDS: &[&str] = &[
    "da", "de", "do", "das", "dos", "e", "para", "com", "of", "the", "and", "for",
];

/// A set of name variants merged so far, with their pooled declared types.
#[derive(Debug, Default)]
struct EntityCluster {
    names: BTreeSet<String>,
    types: BTreeSet<String>,
}

/// Clusters entity name variants and rewrites triples onto canonical names.
#[derive(Debug, Clone)]
pub struct EntityResolver {
    /// Similarity threshold in 0..=100; candidates at or above it merge.
    threshold: u32,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self { threshold: 85 }
    }
}

impl EntityResolver {
    /// Create a resolver with a custom similarity threshold.
    pub fn with_threshold(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Rewrite triples onto canonical entity names.
    ///
    /// 1. Group endpoint names case-insensitively, splitting a casing group
    ///    when variants carry disjoint declared types; pick a case
    ///    representative per subgroup (most uppercase characters, tie-broken
    ///    by longest).
    /// 2. Walk representatives alphabetically; each unabsorbed one seeds a
    ///    cluster and absorbs later representatives that are similar enough
    ///    (weighted ratio, acronym, or containment) and type-compatible.
    /// 3. Substitute endpoints, drop self-loops, dedupe by
    ///    `(source, target, relation)` keeping first-seen order.
    pub fn resolve(&self, triples: &[Triple]) -> Vec<Triple> {
        if triples.is_empty() {
            return Vec::new();
        }

        tracing::info!(count = triples.len(), "resolving entities");

        // Observed type set per exact name, plus case-insensitive groups.
        let mut observed: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut groups: HashMap<String, BTreeSet<String>> = HashMap::new();
        for t in triples {
            for (name, etype) in [(&t.source, &t.source_type), (&t.target, &t.target_type)] {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                observed
                    .entry(name.to_string())
                    .or_default()
                    .insert(etype.clone());
                groups
                    .entry(name.to_lowercase())
                    .or_default()
                    .insert(name.to_string());
            }
        }

        // Pass 1: within each casing group, pool variants into type-compatible
        // subgroups. Incompatible declared types never merge, even for pure
        // casing variants; the type gate applies here exactly as in pass 2.
        let mut case_canonical: HashMap<String, String> = HashMap::new();
        let mut rep_types: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut entity_list: Vec<String> = Vec::with_capacity(groups.len());

        for names in groups.values() {
            let mut subgroups: Vec<EntityCluster> = Vec::new();
            for name in names {
                let types = &observed[name];
                match subgroups
                    .iter_mut()
                    .find(|sub| types_compatible(&sub.types, types))
                {
                    Some(sub) => {
                        sub.names.insert(name.clone());
                        sub.types.extend(types.iter().cloned());
                    }
                    None => subgroups.push(EntityCluster {
                        names: BTreeSet::from([name.clone()]),
                        types: types.clone(),
                    }),
                }
            }

            for sub in subgroups {
                let best = sub
                    .names
                    .iter()
                    .max_by_key(|n| (uppercase_count(n), n.chars().count()))
                    .expect("subgroup is never empty")
                    .clone();
                for name in &sub.names {
                    case_canonical.insert(name.clone(), best.clone());
                }
                rep_types.insert(best.clone(), sub.types);
                entity_list.push(best);
            }
        }
        entity_list.sort();

        // Pass 2: cluster representatives.
        let mut processed: HashSet<String> = HashSet::new();
        let mut final_canonical: HashMap<String, String> = HashMap::new();

        for seed in &entity_list {
            if processed.contains(seed) {
                continue;
            }
            processed.insert(seed.clone());
            final_canonical.insert(seed.clone(), seed.clone());

            let candidates: Vec<&String> = entity_list
                .iter()
                .filter(|e| !processed.contains(*e))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            // Pairwise similarity is the hot loop; score in parallel, then
            // absorb in stable candidate order.
            let scores: Vec<(usize, u32)> = candidates
                .par_iter()
                .enumerate()
                .map(|(i, cand)| (i, weighted_ratio(seed, cand)))
                .collect();

            let seed_types = &rep_types[seed];

            for (i, score) in scores {
                let candidate = candidates[i];
                let is_match = score >= self.threshold
                    || is_acronym_match(seed, candidate)
                    || is_containment_match(seed, candidate);
                if !is_match {
                    continue;
                }

                let candidate_types = &rep_types[candidate];
                if !types_compatible(seed_types, candidate_types) {
                    continue;
                }

                tracing::debug!(seed = %seed, variant = %candidate, score, "merging entity variant");
                final_canonical.insert(candidate.clone(), seed.clone());
                processed.insert(candidate.clone());
            }
        }

        // Pass 3: rewrite triples.
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut out = Vec::new();

        for t in triples {
            let mut rewritten = t.clone();
            rewritten.normalize();

            rewritten.source = canonical_for(&rewritten.source, &case_canonical, &final_canonical);
            rewritten.target = canonical_for(&rewritten.target, &case_canonical, &final_canonical);

            if rewritten.source.is_empty() || rewritten.target.is_empty() {
                continue;
            }
            if rewritten.is_self_loop() {
                continue;
            }
            if seen.insert(rewritten.key()) {
                out.push(rewritten);
            }
        }

        tracing::info!(
            input = triples.len(),
            output = out.len(),
            "entity resolution complete"
        );
        out
    }
}

/// Map a raw name through its casing subgroup, then cluster membership.
fn canonical_for(
    name: &str,
    case_canonical: &HashMap<String, String>,
    final_canonical: &HashMap<String, String>,
) -> String {
    let rep = case_canonical
        .get(name)
        .cloned()
        .unwrap_or_else(|| name.to_string());
    final_canonical.get(&rep).cloned().unwrap_or(rep)
}

fn uppercase_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_uppercase()).count()
}

/// Weighted string similarity in 0..=100.
///
/// Takes the best of a direct Jaro-Winkler comparison and a token-sorted one,
/// both case-folded. Token sorting makes word-order differences
/// ("Paulo, São" vs "São Paulo") score high.
pub fn weighted_ratio(a: &str, b: &str) -> u32 {
    let la = a.to_lowercase();
    let lb = b.to_lowercase();

    let direct = strsim::jaro_winkler(&la, &lb);

    let sort_tokens = |s: &str| {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    };
    let token_sorted = strsim::jaro_winkler(&sort_tokens(&la), &sort_tokens(&lb));

    (direct.max(token_sorted) * 100.0).round() as u32
}

/// Whether one name is a plausible acronym of the other: the short side is
/// 2-6 characters, the long side exceeds 10, and the short side equals the
/// initials of the long side's significant (non-connective) words.
fn is_acronym_match(a: &str, b: &str) -> bool {
    let acronym_of = |text: &str| -> String {
        let words: Vec<&str> = text
            .split_whitespace()
            .filter(|w| !STOP_WORDS.contains(&w.to_lowercase().as_str()))
            .collect();
        if words.len() < 2 {
            return String::new();
        }
        words
            .iter()
            .filter_map(|w| w.chars().next())
            .flat_map(|c| c.to_uppercase())
            .collect()
    };

    let (na, nb) = (a.trim(), b.trim());
    let (len_a, len_b) = (na.chars().count(), nb.chars().count());

    if (2..=6).contains(&len_a) && len_b > 10 {
        return na.to_uppercase() == acronym_of(nb);
    }
    if (2..=6).contains(&len_b) && len_a > 10 {
        return nb.to_uppercase() == acronym_of(na);
    }
    false
}

/// Whether one name contains the other, both exceeding 10 characters.
fn is_containment_match(a: &str, b: &str) -> bool {
    if a.chars().count() <= 10 || b.chars().count() <= 10 {
        return false;
    }
    let la = a.to_lowercase();
    let lb = b.to_lowercase();
    la.contains(&lb) || lb.contains(&la)
}

/// Types are compatible when the observed sets intersect, or either side is
/// effectively unconstrained (empty or containing the unknown sentinel).
fn types_compatible(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    if a.is_empty() || b.is_empty() {
        return true;
    }
    if a.contains(UNKNOWN_TYPE) || b.contains(UNKNOWN_TYPE) {
        return true;
    }
    a.intersection(b).next().is_some()
}

/// Observed entity-type histogram for a triple set, used by callers that want
/// resolution diagnostics without rebuilding the grouping.
pub fn type_histogram(triples: &[Triple]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for t in triples {
        *histogram.entry(t.source_type.clone()).or_insert(0) += 1;
        *histogram.entry(t.target_type.clone()).or_insert(0) += 1;
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(source: &str, st: &str, relation: &str, target: &str, tt: &str) -> Triple {
        Triple::new(source, relation, target).with_types(st, tt)
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let resolver = EntityResolver::default();
        assert!(resolver.resolve(&[]).is_empty());
    }

    #[test]
    fn casing_variants_collapse_to_most_uppercase() {
        let resolver = EntityResolver::default();
        let triples = vec![
            Triple::new("petrobras", "owns", "Refinaria X"),
            Triple::new("PETROBRAS", "employs", "Maria Silva"),
        ];
        let out = resolver.resolve(&triples);
        assert_eq!(out.len(), 2);
        for t in &out {
            assert_eq!(t.source, "PETROBRAS");
        }
    }

    #[test]
    fn acronym_merges_with_long_form() {
        let resolver = EntityResolver::default();
        let triples = vec![
            typed(
                "United States of America",
                "LOCALIDADE",
                "borders",
                "Canada",
                "LOCALIDADE",
            ),
            typed("USA", "LOCALIDADE", "trades_with", "Brasil", "LOCALIDADE"),
        ];
        let out = resolver.resolve(&triples);

        // Both endpoints rewrite to the same canonical name.
        let sources: BTreeSet<&str> = out.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(sources.len(), 1, "USA and long form should merge: {sources:?}");
    }

    #[test]
    fn incompatible_types_do_not_merge() {
        let resolver = EntityResolver::default();
        // Near-identical names, disjoint declared types: must stay separate.
        let triples = vec![
            typed("Banco Central", "ORGANIZACAO", "regulates", "Juros", "CONCEITO"),
            typed("Banco Centrall", "LOCALIDADE", "located_in", "Brasília", "LOCALIDADE"),
        ];
        let out = resolver.resolve(&triples);
        let sources: BTreeSet<&str> = out.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(sources.len(), 2, "type gate must block the merge");
    }

    #[test]
    fn incompatible_typed_casing_variants_stay_apart() {
        let resolver = EntityResolver::default();
        // Same letters, different casing, disjoint declared types: the type
        // gate applies to casing variants too.
        let triples = vec![
            typed("USA", "ORGANIZACAO", "regula", "Mercado", "CONCEITO"),
            typed("usa", "LOCALIDADE", "faz_fronteira_com", "Canada", "LOCALIDADE"),
        ];
        let out = resolver.resolve(&triples);
        let sources: BTreeSet<&str> = out.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(
            sources.len(),
            2,
            "incompatible-typed casing variants must not merge: {sources:?}"
        );
    }

    #[test]
    fn unknown_typed_casing_variant_joins_either_side() {
        let resolver = EntityResolver::default();
        let triples = vec![
            typed("Petrobras", "ORGANIZACAO", "investe_em", "Energia", "CONCEITO"),
            // No declared type: folds into the existing casing group.
            Triple::new("PETROBRAS", "patrocina", "Eventos"),
        ];
        let out = resolver.resolve(&triples);
        for t in &out {
            assert_eq!(t.source, "PETROBRAS");
        }
    }

    #[test]
    fn unknown_type_acts_as_wildcard() {
        let resolver = EntityResolver::default();
        let triples = vec![
            typed("Banco Central", "ORGANIZACAO", "regulates", "Juros", "CONCEITO"),
            // No declared type on the near-duplicate: merge is allowed.
            Triple::new("Banco Centrall", "audits", "Bancos"),
        ];
        let out = resolver.resolve(&triples);
        let sources: BTreeSet<&str> = out.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(sources.len(), 1, "unknown type should not block the merge");
    }

    #[test]
    fn containment_merges_long_names() {
        let resolver = EntityResolver::default();
        let triples = vec![
            Triple::new("Universidade de São Paulo", "located_in", "São Paulo"),
            Triple::new("Universidade de São Paulo - Campus Leste", "teaches", "Engenharia"),
        ];
        let out = resolver.resolve(&triples);
        let sources: BTreeSet<&str> = out.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn self_loops_dropped_after_merge() {
        let resolver = EntityResolver::default();
        // After merging, source == target, so the triple disappears.
        let triples = vec![Triple::new(
            "Universidade de São Paulo",
            "same_as",
            "universidade de são paulo",
        )];
        let out = resolver.resolve(&triples);
        assert!(out.is_empty());
    }

    #[test]
    fn duplicate_triples_deduplicated() {
        let resolver = EntityResolver::default();
        let triples = vec![
            Triple::new("Alpha Corporation", "owns", "Beta Limited"),
            Triple::new("alpha corporation", "OWNS", "Beta Limited"),
        ];
        let out = resolver.resolve(&triples);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn output_never_larger_than_input() {
        let resolver = EntityResolver::default();
        let triples = vec![
            Triple::new("A Company", "owns", "B Company"),
            Triple::new("B Company", "supplies", "C Company"),
            Triple::new("C Company", "competes_with", "A Company"),
        ];
        let out = resolver.resolve(&triples);
        assert!(out.len() <= triples.len());
    }

    #[test]
    fn resolution_is_idempotent() {
        let resolver = EntityResolver::default();
        let triples = vec![
            typed(
                "United States of America",
                "LOCALIDADE",
                "borders",
                "Canada",
                "LOCALIDADE",
            ),
            typed("USA", "LOCALIDADE", "trades_with", "Brasil", "LOCALIDADE"),
            Triple::new("petrobras", "exports", "Petróleo"),
            Triple::new("PETROBRAS", "exports", "Petróleo"),
        ];
        let once = resolver.resolve(&triples);
        let twice = resolver.resolve(&once);
        assert_eq!(once, twice, "re-running resolution must be a no-op");
    }

    #[test]
    fn weighted_ratio_scores_obvious_pairs() {
        assert!(weighted_ratio("Petrobras", "petrobras") >= 99);
        assert!(weighted_ratio("São Paulo Federal", "Federal São Paulo") >= 95);
        assert!(weighted_ratio("Petrobras", "Vale") < 85);
    }

    #[test]
    fn acronym_rules_respect_length_bounds() {
        assert!(is_acronym_match("USP", "Universidade de São Paulo"));
        assert!(is_acronym_match("Universidade de São Paulo", "USP"));
        // Short side too short / long side too short.
        assert!(!is_acronym_match("U", "Universidade de São Paulo"));
        assert!(!is_acronym_match("USP", "Uni Paulo"));
    }

    #[test]
    fn type_histogram_counts_endpoints() {
        let triples = vec![typed("A", "X", "r", "B", "Y"), typed("C", "X", "r", "D", "X")];
        let histogram = type_histogram(&triples);
        assert_eq!(histogram["X"], 3);
        assert_eq!(histogram["Y"], 1);
    }
}
