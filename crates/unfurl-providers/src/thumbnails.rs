//! Thumbnail quality ladder

use crate::provider::Thumbnail;

/// Rank of a label on a ladder. Unknown labels rank below every known one.
pub fn rank(ladder: &[&str], label: &str) -> usize {
    ladder
        .iter()
        .position(|l| *l == label)
        .map(|p| p + 1)
        .unwrap_or(0)
}

/// Highest-ranked candidate with a usable URL. The first candidate wins a tie.
pub fn select_best<'a>(ladder: &[&str], candidates: &'a [Thumbnail]) -> Option<&'a Thumbnail> {
    let mut best: Option<&Thumbnail> = None;
    for candidate in candidates.iter().filter(|c| !c.url.trim().is_empty()) {
        match best {
            Some(current) if rank(ladder, &candidate.label) <= rank(ladder, &current.label) => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const LADDER: &[&str] = &["default", "medium", "high", "standard", "maxres"];

    fn candidates(labels: &[&str]) -> Vec<Thumbnail> {
        labels
            .iter()
            .map(|l| Thumbnail::new(*l, format!("https://i.ytimg.com/vi/x/{}.jpg", l)))
            .collect()
    }

    #[test]
    fn picks_highest_available() {
        let set = candidates(&["default", "high", "medium"]);
        assert_eq!(select_best(LADDER, &set).unwrap().label, "high");

        let set = candidates(&["default", "high", "medium", "standard"]);
        assert_eq!(select_best(LADDER, &set).unwrap().label, "standard");

        let set = candidates(&["default", "high", "medium", "standard", "maxres"]);
        assert_eq!(select_best(LADDER, &set).unwrap().label, "maxres");
    }

    #[test]
    fn unknown_labels_rank_lowest() {
        let set = candidates(&["mystery", "default"]);
        assert_eq!(select_best(LADDER, &set).unwrap().label, "default");

        let set = candidates(&["mystery"]);
        assert_eq!(select_best(LADDER, &set).unwrap().label, "mystery");
    }

    #[test]
    fn empty_urls_are_skipped() {
        let set = vec![Thumbnail::new("maxres", ""), Thumbnail::new("default", "https://x/d.jpg")];
        assert_eq!(select_best(LADDER, &set).unwrap().label, "default");
        assert!(select_best(LADDER, &[]).is_none());
    }
}
