use std::fs;
use std::path::Path;
use tempfile::TempDir;
use workspace_tracker::ExclusionEvaluator;

fn write_ignore(root: &Path, relative_dir: &str, contents: &str) {
    let dir = if relative_dir.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative_dir)
    };
    fs::create_dir_all(&dir).expect("ignore dir");
    fs::write(dir.join(".tfignore"), contents).expect("ignore file");
}

#[cfg(test)]
mod ignore_tests {
    use super::*;

    #[test]
    fn test_nearest_rule_set_wins() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap().to_string();

        write_ignore(tmp.path(), "", "*.log\n");
        write_ignore(tmp.path(), "sub", "!keep.log\n");

        let mut eval = ExclusionEvaluator::new(&root);
        assert!(!eval
            .is_excluded(&format!("{}/sub/keep.log", root), false)
            .unwrap());
        assert!(eval
            .is_excluded(&format!("{}/sub/other.log", root), false)
            .unwrap());
        assert!(eval
            .is_excluded(&format!("{}/top.log", root), false)
            .unwrap());
    }

    #[test]
    fn test_stack_survives_descend_and_ascend() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap().to_string();

        write_ignore(tmp.path(), "", "*.log\n");
        write_ignore(tmp.path(), "sub", "!keep.log\n");
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();

        // Traversal order: into a/, into sub/, back out into b/. The
        // frames for left directories must not leak into later verdicts.
        let mut eval = ExclusionEvaluator::new(&root);
        assert!(eval
            .is_excluded(&format!("{}/a/x.log", root), false)
            .unwrap());
        assert!(!eval
            .is_excluded(&format!("{}/sub/keep.log", root), false)
            .unwrap());
        assert!(eval
            .is_excluded(&format!("{}/b/keep.log", root), false)
            .unwrap());
    }

    #[test]
    fn test_inclusion_applies_only_in_its_own_subtree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap().to_string();

        write_ignore(tmp.path(), "", "output\n");
        write_ignore(tmp.path(), "a", "!output\n");

        let mut eval = ExclusionEvaluator::new(&root);
        assert!(!eval
            .is_excluded(&format!("{}/a/output", root), false)
            .unwrap());
        assert!(eval
            .is_excluded(&format!("{}/b/output", root), false)
            .unwrap());
    }

    #[test]
    fn test_folders_only_rule_on_disk() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap().to_string();

        write_ignore(tmp.path(), "", "build/\n");

        let mut eval = ExclusionEvaluator::new(&root);
        assert!(eval
            .is_excluded(&format!("{}/build", root), true)
            .unwrap());
        assert!(!eval
            .is_excluded(&format!("{}/build", root), false)
            .unwrap());
        // A file beneath an excluded folder is excluded via the folder
        // component.
        assert!(eval
            .is_excluded(&format!("{}/build/out.bin", root), false)
            .unwrap());
    }

    #[test]
    fn test_non_recursive_rule_anchors_to_declaring_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap().to_string();

        write_ignore(tmp.path(), "", "/obj\n");

        let mut eval = ExclusionEvaluator::new(&root);
        assert!(eval.is_excluded(&format!("{}/obj", root), true).unwrap());
        assert!(!eval
            .is_excluded(&format!("{}/deep/obj", root), true)
            .unwrap());
    }

    #[test]
    fn test_global_rules_lose_to_directory_rules() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap().to_string();

        write_ignore(tmp.path(), "", "!special.tmp\n");

        let mut eval = ExclusionEvaluator::new(&root);
        eval.set_global_rules(&["*.tmp".to_string()]);

        assert!(!eval
            .is_excluded(&format!("{}/special.tmp", root), false)
            .unwrap());
        assert!(eval
            .is_excluded(&format!("{}/other.tmp", root), false)
            .unwrap());
    }

    #[test]
    fn test_rules_added_mid_traversal_are_picked_up() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap().to_string();

        let mut eval = ExclusionEvaluator::new(&root);
        assert!(!eval
            .is_excluded(&format!("{}/sub/x.log", root), false)
            .unwrap());

        // A rule file appearing in a directory the evaluator has not yet
        // entered is honored when that directory is first visited.
        write_ignore(tmp.path(), "other", "*.log\n");
        assert!(eval
            .is_excluded(&format!("{}/other/x.log", root), false)
            .unwrap());
    }
}
