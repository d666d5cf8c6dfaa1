use std::sync::Arc;

/// Per-cycle behavior shared by every clocked component.
pub trait ModuleBehaviors {
    /// Advance the component by one clock.
    fn tick_one(&mut self);

    /// Return the component to its post-construction state.
    fn reset(&mut self);
}

pub trait Parameterizable {
    type ConfigType;

    fn conf(&self) -> &Self::ConfigType;

    fn init_conf(&mut self, conf: Arc<Self::ConfigType>);
}
