//! Table name revision for metadata loading.
//!
//! Metadata is collected per physical table. Before it is exposed, each table
//! name is revised by every rule in effect so that, for example, sharded
//! tables `t_order_0` and `t_order_1` both surface as `t_order`.

pub mod sharding;

pub use sharding::ShardingTableNameReviser;

use crate::rule::Rule;

/// Translates a table name seen on a data source into its revised name.
///
/// Implementations must be pure: the same inputs always yield the same
/// output, and nothing is mutated.
pub trait TableNameReviser<R: ?Sized> {
    /// Revise `original_name` as found on `data_source_name`.
    fn revise(&self, original_name: &str, data_source_name: &str, rule: &R) -> String;
}

/// Reviser for rule kinds that do not rename tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTableNameReviser;

impl<R: ?Sized> TableNameReviser<R> for IdentityTableNameReviser {
    fn revise(&self, original_name: &str, _data_source_name: &str, _rule: &R) -> String {
        original_name.to_string()
    }
}

/// Revise a table name with the reviser registered for the rule's kind.
pub fn revise(original_name: &str, data_source_name: &str, rule: &Rule) -> String {
    match rule {
        Rule::Sharding(sharding) => {
            ShardingTableNameReviser.revise(original_name, data_source_name, sharding)
        }
        Rule::Encrypt(encrypt) => {
            IdentityTableNameReviser.revise(original_name, data_source_name, encrypt)
        }
        Rule::ReadwriteSplitting(readwrite) => {
            IdentityTableNameReviser.revise(original_name, data_source_name, readwrite)
        }
        Rule::Single(single) => {
            IdentityTableNameReviser.revise(original_name, data_source_name, single)
        }
    }
}

/// Apply every rule's reviser in order, feeding each the previous result.
pub fn revise_all(original_name: &str, data_source_name: &str, rules: &[Rule]) -> String {
    rules.iter().fold(original_name.to_string(), |name, rule| {
        revise(&name, data_source_name, rule)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologySnapshot;

    fn rules() -> Vec<Rule> {
        let snapshot = TopologySnapshot::build(
            "sharding_db",
            "ds_0: {}\nds_1: {}\n",
            r#"
- !ENCRYPT
  encryptors:
    aes: {type: AES}
  tables:
    t_order:
      columns:
        pwd: {cipherColumn: pwd_cipher, encryptorName: aes}
- !SHARDING
  tables:
    t_order:
      actualDataNodes: ds_${0..1}.t_order_${0..1}
- !SINGLE
  tables: [t_dict]
"#,
        )
        .unwrap();
        snapshot.build_rules().unwrap()
    }

    #[test]
    fn test_identity_for_non_renaming_kinds() {
        for rule in rules().iter().filter(|r| !matches!(r, Rule::Sharding(_))) {
            assert_eq!(revise("t_order_0", "ds_0", rule), "t_order_0");
            assert_eq!(revise("T_Mixed", "ds_x", rule), "T_Mixed");
        }
    }

    #[test]
    fn test_revise_is_deterministic() {
        let rules = rules();
        let first = revise_all("t_order_1", "ds_1", &rules);
        for _ in 0..10 {
            assert_eq!(revise_all("t_order_1", "ds_1", &rules), first);
        }
        assert_eq!(first, "t_order");
    }

    #[test]
    fn test_revise_all_passes_through_unknown_tables() {
        assert_eq!(revise_all("t_user", "ds_0", &rules()), "t_user");
        assert_eq!(revise_all("t_order_0", "ds_9", &rules()), "t_order_0");
    }
}
