use std::collections::BTreeMap;

/// Cell index lists for one peer process: which of our full cells it reads,
/// and which of our cells mirror full cells it owns.
#[derive(Clone, Debug, Default)]
pub struct PeerDescriptor {
    /// Local cells whose conserved values are sent to the peer.
    pub full_ids: Vec<usize>,
    /// Local ghost cells overwritten with the peer's values.
    pub ghost_ids: Vec<usize>,
}

/// Ghost-exchange state for one peer, with the scratch buffers an external
/// transport fills and drains. Buffers are row-major `[cell, quantity]` with
/// one row per id and one column per conserved quantity.
pub struct PeerExchange {
    pub full_ids: Vec<usize>,
    pub ghost_ids: Vec<usize>,
    send_buffer: Vec<f64>,
    recv_buffer: Vec<f64>,
    nsys: usize,
}

impl PeerExchange {
    fn new(descriptor: PeerDescriptor, nsys: usize) -> Self {
        let send_buffer = vec![0.0; descriptor.full_ids.len() * nsys];
        let recv_buffer = vec![0.0; descriptor.ghost_ids.len() * nsys];
        Self {
            full_ids: descriptor.full_ids,
            ghost_ids: descriptor.ghost_ids,
            send_buffer,
            recv_buffer,
            nsys,
        }
    }

    /// Copy column `field` of the outgoing buffer from centroid storage.
    pub fn gather_send(&mut self, field: usize, centroid_values: &[f64]) {
        for (row, &cell) in self.full_ids.iter().enumerate() {
            self.send_buffer[row * self.nsys + field] = centroid_values[cell];
        }
    }

    /// Scatter column `field` of the incoming buffer into ghost cells.
    pub fn scatter_recv(&self, field: usize, centroid_values: &mut [f64]) {
        for (row, &cell) in self.ghost_ids.iter().enumerate() {
            centroid_values[cell] = self.recv_buffer[row * self.nsys + field];
        }
    }

    pub fn send_buffer(&self) -> &[f64] {
        &self.send_buffer
    }

    /// The transport writes received rows here before `update_ghosts` runs.
    pub fn recv_buffer_mut(&mut self) -> &mut [f64] {
        &mut self.recv_buffer
    }
}

/// All per-peer exchange state, keyed by peer process index.
pub struct GhostExchange {
    peers: BTreeMap<usize, PeerExchange>,
}

impl GhostExchange {
    pub fn new(descriptors: BTreeMap<usize, PeerDescriptor>, nsys: usize) -> Self {
        let peers = descriptors
            .into_iter()
            .map(|(peer, d)| (peer, PeerExchange::new(d, nsys)))
            .collect();
        Self { peers }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer(&self, index: usize) -> Option<&PeerExchange> {
        self.peers.get(&index)
    }

    pub fn peer_mut(&mut self, index: usize) -> Option<&mut PeerExchange> {
        self.peers.get_mut(&index)
    }

    pub fn peers(&self) -> impl Iterator<Item = (&usize, &PeerExchange)> {
        self.peers.iter()
    }

    /// Full/ghost flags: 1 for cells this process owns, 0 for every cell
    /// appearing in some peer's ghost list.
    pub fn tri_full_flag(&self, num_cells: usize) -> Vec<u8> {
        let mut flags = vec![1u8; num_cells];
        for exchange in self.peers.values() {
            for &cell in &exchange.ghost_ids {
                flags[cell] = 0;
            }
        }
        flags
    }

    pub fn total_ghost_count(&self) -> usize {
        self.peers.values().map(|p| p.ghost_ids.len()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::{GhostExchange, PeerDescriptor};
    use std::collections::BTreeMap;

    fn two_peer_exchange() -> GhostExchange {
        let mut descriptors = BTreeMap::new();
        descriptors.insert(
            0,
            PeerDescriptor {
                full_ids: vec![0, 1],
                ghost_ids: vec![4],
            },
        );
        descriptors.insert(
            1,
            PeerDescriptor {
                full_ids: vec![2],
                ghost_ids: vec![5],
            },
        );
        GhostExchange::new(descriptors, 2)
    }

    #[test]
    fn flags_mark_ghost_cells() {
        let exchange = two_peer_exchange();
        let flags = exchange.tri_full_flag(6);

        assert_eq!(flags, vec![1, 1, 1, 1, 0, 0]);
        assert_eq!(exchange.total_ghost_count(), 2);
        assert_eq!(
            flags.iter().filter(|&&f| f == 0).count(),
            exchange.total_ghost_count()
        );
    }

    #[test]
    fn gather_and_scatter_round_trip() {
        let mut exchange = two_peer_exchange();
        let mut values = vec![10.0, 11.0, 12.0, 13.0, 0.0, 0.0];

        let peer = exchange.peer_mut(0).unwrap();
        peer.gather_send(0, &values);
        assert_eq!(peer.send_buffer()[0], 10.0);
        assert_eq!(peer.send_buffer()[2], 11.0);

        // Pretend the transport echoed the first sent row back to us.
        peer.recv_buffer_mut()[0] = 10.0;
        peer.scatter_recv(0, &mut values);
        assert_eq!(values[4], 10.0);
    }
}
