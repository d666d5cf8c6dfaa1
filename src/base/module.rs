use std::sync::{Arc, OnceLock};
use crate::base::behavior::*;
use crate::dram::types::Cycle;

/// Clock, mutable state and immutable configuration of a clocked component.
#[derive(Debug)]
pub struct ModuleBase<T, C> {
    pub cycle: Cycle,
    pub state: T,
    pub config: OnceLock<Arc<C>>,
}

impl<T: Default, C> Default for ModuleBase<T, C> {
    fn default() -> Self {
        Self {
            cycle: 0,
            state: T::default(),
            config: OnceLock::new(),
        }
    }
}

impl<T, C> ModuleBase<T, C> {
    pub fn with_state(state: T) -> Self {
        Self {
            cycle: 0,
            state,
            config: OnceLock::new(),
        }
    }
}

pub trait IsModule: ModuleBehaviors {
    type StateType;
    type ConfigType;

    fn base(&mut self) -> &mut ModuleBase<Self::StateType, Self::ConfigType>;

    fn base_ref(&self) -> &ModuleBase<Self::StateType, Self::ConfigType>;

    fn state_mut(&mut self) -> &mut Self::StateType {
        &mut self.base().state
    }

    fn state(&self) -> &Self::StateType {
        &self.base_ref().state
    }

    /// Current clock of the component.
    fn now(&self) -> Cycle {
        self.base_ref().cycle
    }
}

impl<X> Parameterizable for X where X: IsModule {
    type ConfigType = X::ConfigType;

    fn conf(&self) -> &Self::ConfigType {
        self.base_ref().config.get().expect("config not found, was `init_conf` called in `new`?")
    }

    fn init_conf(&mut self, conf: Arc<Self::ConfigType>) {
        if self.base().config.set(conf).is_err() {
            panic!("config already set");
        }
    }
}

/// arguments: identifier, state type, config type, additional methods
macro_rules! module {
    ($comp:ident, $T:ty, $C:ty, $($method:item)*) => {
        impl IsModule for $comp {
            type StateType = $T;
            type ConfigType = $C;

            fn base(&mut self) -> &mut ModuleBase<$T, $C> {
                &mut self.base
            }

            fn base_ref(&self) -> &ModuleBase<$T, $C> {
                &self.base
            }

            $($method)*
        }
    };
}

pub(crate) use module;
