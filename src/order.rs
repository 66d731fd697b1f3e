use crate::error::CaseError;
use crate::mpc::{Bus, MPC};
use std::collections::HashMap;

/// Resolves logical bus ids to row positions.
///
/// Bus ids in a case file are labels, not row numbers, so every lookup goes
/// through this index.
#[derive(Debug, Clone, Default)]
pub struct BusIndex {
    e2i: HashMap<usize, usize>,
    i2e: Vec<usize>,
}

impl BusIndex {
    pub fn new(bus: &[Bus]) -> Result<Self, CaseError> {
        let mut index = Self {
            e2i: HashMap::with_capacity(bus.len()),
            i2e: Vec::with_capacity(bus.len()),
        };
        for (i, b) in bus.iter().enumerate() {
            if index.e2i.insert(b.bus_i, i).is_some() {
                return Err(CaseError::DuplicateBus(b.bus_i));
            }
            index.i2e.push(b.bus_i);
        }
        Ok(index)
    }

    /// Row position of bus `id`.
    pub fn resolve(&self, id: usize) -> Result<usize, CaseError> {
        self.e2i.get(&id).copied().ok_or(CaseError::BusNotFound(id))
    }

    pub fn contains(&self, id: usize) -> bool {
        self.e2i.contains_key(&id)
    }

    /// Bus id at row `i`.
    pub fn external(&self, i: usize) -> usize {
        self.i2e[i]
    }

    pub fn len(&self) -> usize {
        self.i2e.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i2e.is_empty()
    }
}

/// Mapping between a case and its internal, consecutively numbered copy.
#[derive(Debug, Clone)]
pub(crate) struct Order {
    pub bus_on: Vec<usize>,
    pub gen_on: Vec<usize>,
    pub branch_on: Vec<usize>,
    pub storage_on: Vec<usize>,
}

/// Converts a case to internal numbering.
///
/// Isolated buses and out-of-service elements are dropped; bus fields of
/// the remaining elements are replaced by row positions of the internal
/// bus list. Elements that reference an undefined bus are an error.
pub(crate) fn ext_to_int(mpc: &MPC) -> Result<(MPC, Order), CaseError> {
    let all = BusIndex::new(&mpc.bus)?;
    for g in &mpc.gen {
        all.resolve(g.gen_bus)?;
    }
    for br in &mpc.branch {
        all.resolve(br.f_bus)?;
        all.resolve(br.t_bus)?;
    }
    for s in &mpc.storage {
        all.resolve(s.bus)?;
    }

    let bus_on: Vec<usize> = mpc
        .bus
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.is_isolated())
        .map(|(i, _)| i)
        .collect();

    let mut e2i = HashMap::with_capacity(bus_on.len());
    for (i, &j) in bus_on.iter().enumerate() {
        e2i.insert(mpc.bus[j].bus_i, i);
    }

    let gen_on: Vec<usize> = mpc
        .gen
        .iter()
        .enumerate()
        .filter(|(_, g)| g.is_on() && e2i.contains_key(&g.gen_bus))
        .map(|(i, _)| i)
        .collect();
    let branch_on: Vec<usize> = mpc
        .branch
        .iter()
        .enumerate()
        .filter(|(_, br)| {
            br.is_on() && e2i.contains_key(&br.f_bus) && e2i.contains_key(&br.t_bus)
        })
        .map(|(i, _)| i)
        .collect();
    let storage_on: Vec<usize> = mpc
        .storage
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status && e2i.contains_key(&s.bus))
        .map(|(i, _)| i)
        .collect();

    let mut int = MPC {
        name: mpc.name.clone(),
        base_mva: mpc.base_mva,
        bus: bus_on.iter().map(|&j| mpc.bus[j].clone()).collect(),
        gen: gen_on.iter().map(|&j| mpc.gen[j].clone()).collect(),
        branch: branch_on.iter().map(|&j| mpc.branch[j].clone()).collect(),
        storage: storage_on.iter().map(|&j| mpc.storage[j].clone()).collect(),
    };

    // apply consecutive bus numbering
    for b in int.bus.iter_mut() {
        b.bus_i = e2i[&b.bus_i];
    }
    for g in int.gen.iter_mut() {
        g.gen_bus = e2i[&g.gen_bus];
    }
    for br in int.branch.iter_mut() {
        br.f_bus = e2i[&br.f_bus];
        br.t_bus = e2i[&br.t_bus];
    }
    for s in int.storage.iter_mut() {
        s.bus = e2i[&s.bus];
    }

    Ok((
        int,
        Order {
            bus_on,
            gen_on,
            branch_on,
            storage_on,
        },
    ))
}

/// Copies solution fields of an internal case back onto the external case.
/// Out-of-service generators and branches get zero flows.
pub(crate) fn int_to_ext(external: &MPC, internal: &MPC, order: &Order) -> MPC {
    let mut mpc = external.clone();

    for (i, &j) in order.bus_on.iter().enumerate() {
        mpc.bus[j].vm = internal.bus[i].vm;
        mpc.bus[j].va = internal.bus[i].va;
    }

    mpc.gen.iter_mut().for_each(|g| {
        g.pg = 0.0;
        g.qg = 0.0;
    });
    for (i, &j) in order.gen_on.iter().enumerate() {
        mpc.gen[j].pg = internal.gen[i].pg;
        mpc.gen[j].qg = internal.gen[i].qg;
    }

    mpc.branch.iter_mut().for_each(|br| {
        br.pf = 0.0;
        br.qf = 0.0;
        br.pt = 0.0;
        br.qt = 0.0;
    });
    for (i, &j) in order.branch_on.iter().enumerate() {
        let br = &internal.branch[i];
        mpc.branch[j].pf = br.pf;
        mpc.branch[j].qf = br.qf;
        mpc.branch[j].pt = br.pt;
        mpc.branch[j].qt = br.qt;
    }

    mpc
}
