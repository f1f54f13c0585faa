//! Simulation scenarios: the ledger to start from and who sends where.

use fundflow_common::{AccountId, Currency, UserId};
use fundflow_ledger::{LedgerSeed, NewAccount, NewDistributionRule};
use rust_decimal::Decimal;

/// Opening balance of every sender.
const SENDER_BALANCE: i64 = 10_000;

/// One recurring transfer route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub source: AccountId,
    pub gateway: AccountId,
    pub initiator: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Every sender pays into one gateway with three destinations.
    SharedGateway,
    /// Each sender has a private gateway and destination.
    Disjoint,
    /// Healthy traffic mixed with gateways that must reject every transfer.
    Misconfigured,
}

/// A simulation scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ScenarioKind,
    /// Number of sending accounts.
    pub senders: usize,
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str, senders: usize) -> anyhow::Result<Self> {
        let (name, description, kind) = match name {
            "shared-gateway" => (
                "shared-gateway",
                "USD senders converging on one EUR gateway",
                ScenarioKind::SharedGateway,
            ),
            "disjoint" => (
                "disjoint",
                "Independent sender/gateway pairs that never contend",
                ScenarioKind::Disjoint,
            ),
            "misconfigured" => (
                "misconfigured",
                "Broken gateways next to a healthy one",
                ScenarioKind::Misconfigured,
            ),
            _ => anyhow::bail!("Unknown scenario: {}", name),
        };
        if senders == 0 {
            anyhow::bail!("A scenario needs at least one sender");
        }

        Ok(Self {
            name,
            description,
            kind,
            senders,
        })
    }

    /// Rates the static provider serves.
    pub fn rates(&self) -> Vec<(Currency, Currency, Decimal)> {
        vec![
            (Currency::Usd, Currency::Eur, Decimal::new(92, 2)),
            (Currency::Gbp, Currency::Eur, Decimal::new(117, 2)),
        ]
    }

    /// Starting ledger and the routes transfers are drawn from.
    pub fn build(&self) -> (LedgerSeed, Vec<Flow>) {
        let mut builder = LedgerBuilder::default();
        let mut flows = Vec::new();

        match self.kind {
            ScenarioKind::SharedGateway => {
                let gateway = builder.gateway();
                for pct in [50, 30, 20] {
                    let destination = builder.account(Currency::Eur, 0);
                    builder.rule(gateway, destination, pct);
                }
                for i in 0..self.senders {
                    let currency = if i % 4 == 3 { Currency::Gbp } else { Currency::Usd };
                    let (source, user) = builder.sender(currency);
                    flows.push(Flow {
                        source,
                        gateway,
                        initiator: user,
                    });
                }
            }
            ScenarioKind::Disjoint => {
                for _ in 0..self.senders {
                    let gateway = builder.gateway();
                    let destination = builder.account(Currency::Eur, 0);
                    builder.rule(gateway, destination, 100);
                    let (source, user) = builder.sender(Currency::Usd);
                    flows.push(Flow {
                        source,
                        gateway,
                        initiator: user,
                    });
                }
            }
            ScenarioKind::Misconfigured => {
                let healthy = builder.gateway();
                let shared = builder.account(Currency::Eur, 0);
                builder.rule(healthy, shared, 100);

                // Rules add up to 90 %.
                let short = builder.gateway();
                builder.rule(short, shared, 60);
                let other = builder.account(Currency::Eur, 0);
                builder.rule(short, other, 30);

                // Second destination holds the wrong currency.
                let mixed = builder.gateway();
                builder.rule(mixed, shared, 50);
                let dollars = builder.account(Currency::Usd, 0);
                builder.rule(mixed, dollars, 50);

                let empty = builder.gateway();

                let gateways = [healthy, short, mixed, empty];
                for i in 0..self.senders {
                    let (source, user) = builder.sender(Currency::Usd);
                    flows.push(Flow {
                        source,
                        gateway: gateways[i % gateways.len()],
                        initiator: user,
                    });
                }
            }
        }

        (builder.seed, flows)
    }
}

/// Allocates ids and owners while assembling a seed.
#[derive(Default)]
struct LedgerBuilder {
    seed: LedgerSeed,
    next_id: i64,
}

impl LedgerBuilder {
    fn next(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn account(&mut self, currency: Currency, balance: i64) -> AccountId {
        let id = self.next();
        self.seed.accounts.push(
            NewAccount::new(UserId::new(id), currency, Decimal::new(balance * 100, 2))
                .with_id(AccountId::new(id)),
        );
        AccountId::new(id)
    }

    fn sender(&mut self, currency: Currency) -> (AccountId, UserId) {
        let id = self.account(currency, SENDER_BALANCE);
        (id, UserId::new(id.get()))
    }

    fn gateway(&mut self) -> AccountId {
        let id = self.next();
        self.seed.accounts.push(
            NewAccount::gateway(UserId::new(id), Currency::Eur).with_id(AccountId::new(id)),
        );
        AccountId::new(id)
    }

    fn rule(&mut self, gateway: AccountId, destination: AccountId, percentage: i64) {
        self.seed.rules.push(NewDistributionRule::new(
            gateway,
            destination,
            Decimal::from(percentage),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scenario() {
        assert!(Scenario::load("netting", 3).is_err());
        assert!(Scenario::load("disjoint", 0).is_err());
    }

    #[test]
    fn test_shared_gateway_layout() {
        let scenario = Scenario::load("shared-gateway", 8).unwrap();
        let (seed, flows) = scenario.build();

        assert_eq!(flows.len(), 8);
        assert!(flows.iter().all(|f| f.gateway == flows[0].gateway));
        assert_eq!(seed.rules.len(), 3);
        assert_eq!(seed.accounts.len(), 1 + 3 + 8);
    }

    #[test]
    fn test_disjoint_flows_share_nothing() {
        let scenario = Scenario::load("disjoint", 5).unwrap();
        let (seed, flows) = scenario.build();

        let mut touched = std::collections::BTreeSet::new();
        for flow in &flows {
            assert!(touched.insert(flow.source));
            assert!(touched.insert(flow.gateway));
        }
        for rule in &seed.rules {
            assert!(touched.insert(rule.destination_account));
        }
    }
}
