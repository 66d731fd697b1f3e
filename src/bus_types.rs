use crate::error::CaseError;
use crate::mpc::{Bus, Gen};
use std::collections::HashSet;

/// Builds index lists for each type of bus (REF, PV, PQ).
///
/// Only in-service generators that regulate voltage can hold a bus at PV
/// or REF; every other bus is solved as PQ. Expects `bus` and `gen` to use
/// internal consecutive bus numbering.
pub fn bus_types(
    bus: &[Bus],
    gen: &[Gen],
) -> Result<(Vec<usize>, Vec<usize>, Vec<usize>), CaseError> {
    let bus_gen_status = gen
        .iter()
        .filter(|g| g.is_on() && g.kind.regulates_voltage())
        .map(|g| g.gen_bus)
        .collect::<HashSet<usize>>();

    let refbus = bus
        .iter()
        .filter(|b| b.is_ref() && bus_gen_status.contains(&b.bus_i))
        .map(|b| b.bus_i)
        .collect::<Vec<usize>>();
    let pv = bus
        .iter()
        .filter(|b| b.is_pv() && bus_gen_status.contains(&b.bus_i))
        .map(|b| b.bus_i)
        .collect::<Vec<usize>>();
    let pq = bus
        .iter()
        .filter(|b| !bus_gen_status.contains(&b.bus_i) || b.is_pq())
        .map(|b| b.bus_i)
        .collect::<Vec<usize>>();

    if refbus.is_empty() {
        return Err(CaseError::NoReferenceBus);
    }

    Ok((refbus, pv, pq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::GenKind;
    use crate::order::ext_to_int;

    #[test]
    fn case9_types() -> anyhow::Result<()> {
        let (int, _) = ext_to_int(&crate::catalog::case9())?;
        let (refbus, pv, pq) = bus_types(&int.bus, &int.gen)?;
        assert_eq!(refbus, vec![0]);
        assert_eq!(pv, vec![1, 2]);
        assert_eq!(pq, vec![3, 4, 5, 6, 7, 8]);
        Ok(())
    }

    #[test]
    fn renewable_unit_does_not_make_pv() -> anyhow::Result<()> {
        let mut mpc = crate::catalog::case9();
        mpc.gen[1].kind = GenKind::Solar;
        let (int, _) = ext_to_int(&mpc)?;
        let (_, pv, pq) = bus_types(&int.bus, &int.gen)?;
        assert_eq!(pv, vec![2]);
        assert!(pq.contains(&1));
        Ok(())
    }

    #[test]
    fn missing_reference() -> anyhow::Result<()> {
        let mut mpc = crate::catalog::case9();
        mpc.gen[0].status = false;
        let (int, _) = ext_to_int(&mpc)?;
        assert!(matches!(
            bus_types(&int.bus, &int.gen),
            Err(CaseError::NoReferenceBus)
        ));
        Ok(())
    }
}
