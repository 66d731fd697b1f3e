//! MATPOWER column positions (zero based).
//!
//! Result fields are only read after the row has been checked against the
//! matching `*_RESULT_COLS` minimum.

// Bus //

pub(crate) const BUS_I: usize = 0; // bus number (1 to 29997)
pub(crate) const BUS_TYPE: usize = 1; // bus type
pub(crate) const PD: usize = 2; // Pd, real power demand (MW)
pub(crate) const QD: usize = 3; // Qd, reactive power demand (MVAr)
pub(crate) const GS: usize = 4; // Gs, shunt conductance (MW at V = 1.0 p.u.)
pub(crate) const BS: usize = 5; // Bs, shunt susceptance (MVAr at V = 1.0 p.u.)
pub(crate) const BUS_AREA: usize = 6; // area number, 1-100
pub(crate) const VM: usize = 7; // Vm, voltage magnitude (p.u.)
pub(crate) const VA: usize = 8; // Va, voltage angle (degrees)
pub(crate) const BASE_KV: usize = 9; // baseKV, base voltage (kV)
pub(crate) const ZONE: usize = 10; // zone, loss zone (1-999)
pub(crate) const VMAX: usize = 11; // maxVm, maximum voltage magnitude (p.u.)
pub(crate) const VMIN: usize = 12; // minVm, minimum voltage magnitude (p.u.)

pub(crate) const BUS_COLS: usize = 13;
pub(crate) const BUS_RESULT_COLS: usize = VA + 1;

// Gen //

pub(crate) const GEN_BUS: usize = 0; // bus number
pub(crate) const PG: usize = 1; // Pg, real power output (MW)
pub(crate) const QG: usize = 2; // Qg, reactive power output (MVAr)
pub(crate) const QMAX: usize = 3; // Qmax, maximum reactive power output at Pmin (MVAr)
pub(crate) const QMIN: usize = 4; // Qmin, minimum reactive power output at Pmin (MVAr)
pub(crate) const VG: usize = 5; // Vg, voltage magnitude setpoint (p.u.)
pub(crate) const MBASE: usize = 6; // mBase, total MVA base of this machine, defaults to baseMVA
pub(crate) const GEN_STATUS: usize = 7; // status, 1 - machine in service, 0 - machine out of service
pub(crate) const PMAX: usize = 8; // Pmax, maximum real power output (MW)
pub(crate) const PMIN: usize = 9; // Pmin, minimum real power output (MW)

pub(crate) const GEN_COLS: usize = 10;
pub(crate) const GEN_RESULT_COLS: usize = QG + 1;

// Branch //

pub(crate) const F_BUS: usize = 0; // f, from bus number
pub(crate) const T_BUS: usize = 1; // t, to bus number
pub(crate) const BR_R: usize = 2; // r, resistance (p.u.)
pub(crate) const BR_X: usize = 3; // x, reactance (p.u.)
pub(crate) const BR_B: usize = 4; // b, total line charging susceptance (p.u.)
pub(crate) const RATE_A: usize = 5; // rateA, MVA rating A (long term rating)
pub(crate) const RATE_B: usize = 6; // rateB, MVA rating B (short term rating)
pub(crate) const RATE_C: usize = 7; // rateC, MVA rating C (emergency rating)
pub(crate) const TAP: usize = 8; // ratio, transformer off nominal turns ratio
pub(crate) const SHIFT: usize = 9; // angle, transformer phase shift angle (degrees)
pub(crate) const BR_STATUS: usize = 10; // initial branch status, 1 - in service, 0 - out of service
pub(crate) const ANGMIN: usize = 11; // minimum angle difference, angle(Vf) - angle(Vt) (degrees)
pub(crate) const ANGMAX: usize = 12; // maximum angle difference, angle(Vf) - angle(Vt) (degrees)

// included in power flow solution, not necessarily in input
pub(crate) const PF: usize = 13; // real power injected at "from" bus end (MW)
pub(crate) const QF: usize = 14; // reactive power injected at "from" bus end (MVAr)
pub(crate) const PT: usize = 15; // real power injected at "to" bus end (MW)
pub(crate) const QT: usize = 16; // reactive power injected at "to" bus end (MVAr)

pub(crate) const BRANCH_COLS: usize = 13;
pub(crate) const BRANCH_RESULT_COLS: usize = QT + 1;

// Gencost //

pub(crate) const PW_LINEAR: usize = 1;
pub(crate) const POLYNOMIAL: usize = 2;

pub(crate) const MODEL: usize = 0; // cost model, 1 = piecewise linear, 2 = polynomial
pub(crate) const STARTUP: usize = 1; // startup cost in US dollars
pub(crate) const SHUTDOWN: usize = 2; // shutdown cost in US dollars
pub(crate) const NCOST: usize = 3; // number of cost coefficients or data points
pub(crate) const COST: usize = 4; // first cost parameter
