//! PFCP session context
//!
//! A session owns its rules and the handles of the transactions still
//! alive for it. Rules refer to each other by id; lookups go through the
//! session so a dangling id simply resolves to `None`.

use ogs_core::OgsPoolId;

use crate::error::{PfcpError, PfcpResult};
use crate::grouped::CreatedPdr;
use crate::rule::{
    alloc_rule_id, Bar, BarId, Direction, Far, FarId, LocalFTeid, Pdr, PdrId, Qer, QerId, Urr,
    UrrId,
};
use crate::types::{ApplyAction, PfcpCause, PfcpInterface};

pub type SessHandle = OgsPoolId;

/// Rules making up one QoS flow (bearer)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosFlow {
    pub dl_pdr: PdrId,
    pub ul_pdr: PdrId,
    pub dl_far: FarId,
    pub ul_far: FarId,
    pub qer: Option<QerId>,
}

#[derive(Debug)]
pub struct PfcpSess {
    /// SEID allocated by this node
    pub local_seid: u64,
    /// SEID learned from the peer's F-SEID
    pub remote_seid: Option<u64>,
    pub node: OgsPoolId,
    pub pdn_type: Option<u8>,

    pub pdrs: Vec<Pdr>,
    pub fars: Vec<Far>,
    pub qers: Vec<Qer>,
    pub urrs: Vec<Urr>,
    pub bar: Option<Bar>,

    pub(crate) xacts: Vec<OgsPoolId>,
    pub(crate) started: std::time::Instant,
}

impl PfcpSess {
    pub fn new(local_seid: u64, node: OgsPoolId) -> Self {
        PfcpSess {
            local_seid,
            remote_seid: None,
            node,
            pdn_type: None,
            pdrs: Vec::new(),
            fars: Vec::new(),
            qers: Vec::new(),
            urrs: Vec::new(),
            bar: None,
            xacts: Vec::new(),
            started: std::time::Instant::now(),
        }
    }

    /// Remote SEID known and no CHOOSE left unanswered.
    pub fn is_established(&self) -> bool {
        self.remote_seid.is_some() && !self.pdrs.iter().any(Pdr::is_choose_pending)
    }

    /// Transactions still referring to this session.
    pub fn xacts(&self) -> &[OgsPoolId] {
        &self.xacts
    }

    pub fn add_pdr(&mut self, src_if: PfcpInterface) -> PfcpResult<&mut Pdr> {
        let id = alloc_rule_id("pdr", self.pdrs.iter().map(|p| p.id as u32), u16::MAX as u32)?;
        self.pdrs.push(Pdr::new(id as PdrId, src_if));
        self.pdrs.last_mut().ok_or(PfcpError::PoolExhausted("pdr"))
    }

    pub fn add_far(&mut self, dst_if: PfcpInterface, apply_action: ApplyAction) -> PfcpResult<&mut Far> {
        let id = alloc_rule_id("far", self.fars.iter().map(|f| f.id), u32::MAX)?;
        self.fars.push(Far::new(id, dst_if, apply_action));
        self.fars.last_mut().ok_or(PfcpError::PoolExhausted("far"))
    }

    pub fn add_qer(&mut self) -> PfcpResult<&mut Qer> {
        let id = alloc_rule_id("qer", self.qers.iter().map(|q| q.id), u32::MAX)?;
        self.qers.push(Qer::new(id));
        self.qers.last_mut().ok_or(PfcpError::PoolExhausted("qer"))
    }

    pub fn add_urr(&mut self) -> PfcpResult<&mut Urr> {
        let id = alloc_rule_id("urr", self.urrs.iter().map(|u| u.id), u32::MAX)?;
        self.urrs.push(Urr::new(id));
        self.urrs.last_mut().ok_or(PfcpError::PoolExhausted("urr"))
    }

    /// At most one BAR per session; an existing one is returned as is.
    pub fn create_bar(&mut self) -> &mut Bar {
        self.bar.get_or_insert_with(|| Bar::new(1))
    }

    pub fn find_pdr(&self, id: PdrId) -> Option<&Pdr> {
        self.pdrs.iter().find(|p| p.id == id)
    }

    pub fn find_pdr_mut(&mut self, id: PdrId) -> Option<&mut Pdr> {
        self.pdrs.iter_mut().find(|p| p.id == id)
    }

    pub fn find_far(&self, id: FarId) -> Option<&Far> {
        self.fars.iter().find(|f| f.id == id)
    }

    pub fn find_far_mut(&mut self, id: FarId) -> Option<&mut Far> {
        self.fars.iter_mut().find(|f| f.id == id)
    }

    pub fn find_qer(&self, id: QerId) -> Option<&Qer> {
        self.qers.iter().find(|q| q.id == id)
    }

    pub fn find_qer_mut(&mut self, id: QerId) -> Option<&mut Qer> {
        self.qers.iter_mut().find(|q| q.id == id)
    }

    pub fn find_urr(&self, id: UrrId) -> Option<&Urr> {
        self.urrs.iter().find(|u| u.id == id)
    }

    pub fn find_urr_mut(&mut self, id: UrrId) -> Option<&mut Urr> {
        self.urrs.iter_mut().find(|u| u.id == id)
    }

    pub fn find_bar(&self, id: BarId) -> Option<&Bar> {
        self.bar.as_ref().filter(|b| b.id == id)
    }

    pub fn remove_pdr(&mut self, id: PdrId) -> Option<Pdr> {
        let pos = self.pdrs.iter().position(|p| p.id == id)?;
        Some(self.pdrs.remove(pos))
    }

    pub fn remove_far(&mut self, id: FarId) -> Option<Far> {
        let pos = self.fars.iter().position(|f| f.id == id)?;
        Some(self.fars.remove(pos))
    }

    pub fn remove_qer(&mut self, id: QerId) -> Option<Qer> {
        let pos = self.qers.iter().position(|q| q.id == id)?;
        Some(self.qers.remove(pos))
    }

    pub fn remove_urr(&mut self, id: UrrId) -> Option<Urr> {
        let pos = self.urrs.iter().position(|u| u.id == id)?;
        Some(self.urrs.remove(pos))
    }

    pub fn remove_bar(&mut self) -> Option<Bar> {
        self.bar.take()
    }

    /// Drop every rule of the session.
    pub fn remove_all_rules(&mut self) {
        self.pdrs.clear();
        self.fars.clear();
        self.qers.clear();
        self.urrs.clear();
        self.bar = None;
    }

    /// The FAR a PDR forwards to.
    pub fn pdr_far(&self, pdr: &Pdr) -> Option<&Far> {
        pdr.far_id.and_then(|id| self.find_far(id))
    }

    /// Direction of a PDR given its FAR, `None` without FAR or for core -> core.
    pub fn pdr_direction(&self, pdr: &Pdr) -> Option<Direction> {
        self.pdr_far(pdr).and_then(|far| Direction::classify(pdr.src_if, far.dst_if))
    }

    /// Create a PDR/FAR pair.
    pub fn add_pdr_far(
        &mut self,
        src_if: PfcpInterface,
        dst_if: PfcpInterface,
        apply_action: ApplyAction,
    ) -> PfcpResult<(PdrId, FarId)> {
        let far_id = self.add_far(dst_if, apply_action)?.id;
        let pdr = self.add_pdr(src_if)?;
        pdr.far_id = Some(far_id);
        Ok((pdr.id, far_id))
    }

    /// Downlink and uplink PDR/FAR pairs sharing one QER.
    pub fn add_qos_flow(&mut self, qfi: u8) -> PfcpResult<QosFlow> {
        let (dl_pdr, dl_far) = self.add_pdr_far(
            PfcpInterface::Core,
            PfcpInterface::Access,
            ApplyAction(ApplyAction::FORW),
        )?;
        let (ul_pdr, ul_far) = self.add_pdr_far(
            PfcpInterface::Access,
            PfcpInterface::Core,
            ApplyAction(ApplyAction::FORW),
        )?;
        let qer = self.add_qer()?;
        qer.qfi = qfi;
        let qer = qer.id;

        for id in [dl_pdr, ul_pdr] {
            if let Some(pdr) = self.find_pdr_mut(id) {
                pdr.qer_id = Some(qer);
                pdr.qfi = qfi;
            }
        }

        Ok(QosFlow { dl_pdr, ul_pdr, dl_far, ul_far, qer: Some(qer) })
    }

    /// Record the tunnel endpoint reported in a Created PDR.
    ///
    /// Only a PDR that asked the peer to CHOOSE learns its F-TEID here.
    pub fn handle_created_pdr(&mut self, created: &CreatedPdr) -> Result<(), PfcpCause> {
        let pdr = self.find_pdr_mut(created.pdr_id).ok_or_else(|| {
            log::error!("Unknown PDR-ID[{}] in Created PDR", created.pdr_id);
            PfcpCause::MandatoryIeIncorrect
        })?;

        let Some(f_teid) = &created.local_f_teid else {
            return Ok(());
        };

        match &pdr.local_f_teid {
            Some(LocalFTeid::Choose { .. }) | Some(LocalFTeid::Learned(_)) => {
                log::debug!("PDR-ID[{}] F-TEID TEID[0x{:x}]", pdr.id, f_teid.teid);
                pdr.local_f_teid = Some(LocalFTeid::Learned(f_teid.clone()));
            }
            Some(LocalFTeid::Assigned(assigned)) if assigned.teid != f_teid.teid => {
                log::warn!(
                    "PDR-ID[{}] F-TEID mismatch [0x{:x}:0x{:x}]",
                    pdr.id,
                    assigned.teid,
                    f_teid.teid
                );
            }
            _ => {}
        }
        Ok(())
    }

    /// PDRs still waiting for the peer to choose their F-TEID.
    pub fn pending_choose(&self) -> impl Iterator<Item = &Pdr> {
        self.pdrs.iter().filter(|p| p.is_choose_pending())
    }
}
