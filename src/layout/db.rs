use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arcstr::ArcStr;
use log::{debug, trace};
use serde::Serialize;

use super::cell::Cell;
use super::context::LayoutCtx;
use super::grid::PlacementGrid;
use crate::error::Result;

/// A parameterized layout generator.
pub trait Component: Sized + 'static {
    type Params: Serialize + Clone;

    fn new(params: &Self::Params, grid: &PlacementGrid) -> Result<Self>;

    fn name(&self) -> ArcStr;

    fn layout(&self, ctx: &mut LayoutCtx) -> Result<()>;
}

/// Template cache for one compilation.
///
/// Templates are keyed on the component type and its serialized
/// parameters, so identical parameter sets share one [`Cell`]. Distinct
/// templates with the same base name get a numeric suffix.
pub struct TemplateDb {
    grid: Arc<PlacementGrid>,
    cache: HashMap<(TypeId, String), Arc<Cell>>,
    names: HashSet<ArcStr>,
}

impl TemplateDb {
    pub fn new(grid: PlacementGrid) -> Result<Self> {
        grid.validate()?;
        Ok(Self {
            grid: Arc::new(grid),
            cache: HashMap::new(),
            names: HashSet::new(),
        })
    }

    #[inline]
    pub fn grid(&self) -> &Arc<PlacementGrid> {
        &self.grid
    }

    pub fn instantiate<C: Component>(&mut self, params: &C::Params) -> Result<Arc<Cell>> {
        let key = (TypeId::of::<C>(), serde_json::to_string(params)?);
        if let Some(cell) = self.cache.get(&key) {
            trace!("reusing template `{}`", cell.name());
            return Ok(cell.clone());
        }

        let grid = self.grid.clone();
        let component = C::new(params, &grid)?;
        let name = self.unique_name(&component.name());
        self.names.insert(name.clone());
        let mut ctx = LayoutCtx::new(self, name.clone());
        let cell = match component.layout(&mut ctx).map(|()| ctx.finish()) {
            Ok(cell) => Arc::new(cell),
            Err(e) => {
                self.names.remove(&name);
                return Err(e);
            }
        };

        debug!(
            "created template `{}` ({} cols, {} instances)",
            name,
            cell.num_cols(),
            cell.instances().len()
        );
        self.cache.insert(key, cell.clone());
        Ok(cell)
    }

    fn unique_name(&self, base: &ArcStr) -> ArcStr {
        if !self.names.contains(base) {
            return base.clone();
        }
        (1..)
            .map(|i| arcstr::format!("{base}_{i}"))
            .find(|name| !self.names.contains(name))
            .unwrap_or_else(|| base.clone())
    }

    /// Number of distinct templates of component `C` created so far.
    pub fn num_templates<C: Component>(&self) -> usize {
        let id = TypeId::of::<C>();
        self.cache.keys().filter(|(t, _)| *t == id).count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::blocks::latch::{LatchCore, LatchSizing, StorageParams};
    use crate::error::Error;
    use crate::tests::test_grid;

    use super::*;

    fn latch_params(seg_in: usize) -> StorageParams {
        StorageParams {
            tile: arcstr::literal!("logic"),
            sizing: LatchSizing {
                seg_in,
                seg_fb: 1,
                seg_ck: 1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_template_reuse() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let a = db.instantiate::<LatchCore>(&latch_params(2)).unwrap();
        let b = db.instantiate::<LatchCore>(&latch_params(2)).unwrap();
        let c = db.instantiate::<LatchCore>(&latch_params(4)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(db.num_templates::<LatchCore>(), 2);
        assert_eq!(a.name(), "latch_core");
        assert_eq!(c.name(), "latch_core_1");
    }

    #[test]
    fn test_failed_template_is_not_cached() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let mut params = latch_params(2);
        params.tile = arcstr::literal!("missing");
        assert!(matches!(
            db.instantiate::<LatchCore>(&params),
            Err(Error::TileNotFound(_))
        ));
        assert!(db.is_empty());

        // The failed template does not hold on to its name.
        let cell = db.instantiate::<LatchCore>(&latch_params(2)).unwrap();
        assert_eq!(cell.name(), "latch_core");
    }
}
