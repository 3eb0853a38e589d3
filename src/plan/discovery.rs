use crate::storage::relative_to;

use super::SnapshotPlan;

/// Hands every archive file to the first plan whose template matches it.
///
/// Plans with longer literal prefix plus suffix are tried first so that
/// `a-v8-{date}` claims `a-v8-20240913` before `a-{date}` can. Plans of equal
/// length keep declaration order. Returns the files no plan accepted.
pub fn discover(plans: &mut [SnapshotPlan], archive_files: &[String], archive_path: &str) -> Vec<String> {
    let mut order: Vec<usize> = (0..plans.len()).collect();
    order.sort_by(|&a, &b| {
        plans[b]
            .file_template()
            .literal_len()
            .cmp(&plans[a].file_template().literal_len())
    });

    let mut unaccepted = Vec::new();
    for archive_file in archive_files {
        let claimed = match relative_to(archive_path, archive_file) {
            Some(name) => order.iter().any(|&index| plans[index].accept(name)),
            None => false,
        };
        if !claimed {
            unaccepted.push(archive_file.clone());
        }
    }

    for plan in plans.iter_mut() {
        plan.sort_snapshots();
    }
    unaccepted
}
