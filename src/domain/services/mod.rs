mod selection;

pub use selection::{
    GeographicStrategy, LeastLoadStrategy, PriorityStrategy, RandomStrategy, RoundRobinStrategy,
    StrategySet,
};
