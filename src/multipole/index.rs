// Compressed storage slots of symmetric tensors.
//
// Slots are numbered in lexicographic order of the sorted multi-index, so for rank 2 the
// order is xx, xy, xz, yy, yz, zz. `MULTn[slot]` counts how many full multi-indices share
// the slot.

pub const MI2: [[usize; 3]; 3] = build_mi2();
pub const MI3: [[[usize; 3]; 3]; 3] = build_mi3();
pub const MI4: [[[[usize; 3]; 3]; 3]; 3] = build_mi4();

pub const MULT2: [usize; 6] = build_mult2();
pub const MULT3: [usize; 10] = build_mult3();
pub const MULT4: [usize; 15] = build_mult4();

const fn sorted<const R: usize>(mut a: [usize; R]) -> [usize; R] {
    let mut i = 1;
    while i < R {
        let mut j = i;
        while j > 0 && a[j - 1] > a[j] {
            let t = a[j];
            a[j] = a[j - 1];
            a[j - 1] = t;
            j -= 1;
        }
        i += 1;
    }
    a
}

const fn build_mi2() -> [[usize; 3]; 3] {
    let mut t = [[0; 3]; 3];
    let mut slot = 0;
    let mut i = 0;
    while i < 3 {
        let mut k = i;
        while k < 3 {
            t[i][k] = slot;
            t[k][i] = slot;
            slot += 1;
            k += 1;
        }
        i += 1;
    }
    t
}

const fn build_mi3() -> [[[usize; 3]; 3]; 3] {
    let mut t = [[[0; 3]; 3]; 3];
    let mut slot = 0;
    let mut i = 0;
    while i < 3 {
        let mut k = i;
        while k < 3 {
            let mut l = k;
            while l < 3 {
                t[i][k][l] = slot;
                slot += 1;
                l += 1;
            }
            k += 1;
        }
        i += 1;
    }
    let mut n = 0;
    while n < 27 {
        let s = sorted([n / 9, n / 3 % 3, n % 3]);
        t[n / 9][n / 3 % 3][n % 3] = t[s[0]][s[1]][s[2]];
        n += 1;
    }
    t
}

const fn build_mi4() -> [[[[usize; 3]; 3]; 3]; 3] {
    let mut t = [[[[0; 3]; 3]; 3]; 3];
    let mut slot = 0;
    let mut i = 0;
    while i < 3 {
        let mut k = i;
        while k < 3 {
            let mut l = k;
            while l < 3 {
                let mut m = l;
                while m < 3 {
                    t[i][k][l][m] = slot;
                    slot += 1;
                    m += 1;
                }
                l += 1;
            }
            k += 1;
        }
        i += 1;
    }
    let mut n = 0;
    while n < 81 {
        let idx = [n / 27, n / 9 % 3, n / 3 % 3, n % 3];
        let s = sorted(idx);
        t[idx[0]][idx[1]][idx[2]][idx[3]] = t[s[0]][s[1]][s[2]][s[3]];
        n += 1;
    }
    t
}

const fn build_mult2() -> [usize; 6] {
    let mut mult = [0; 6];
    let mut n = 0;
    while n < 9 {
        mult[MI2[n / 3][n % 3]] += 1;
        n += 1;
    }
    mult
}

const fn build_mult3() -> [usize; 10] {
    let mut mult = [0; 10];
    let mut n = 0;
    while n < 27 {
        mult[MI3[n / 9][n / 3 % 3][n % 3]] += 1;
        n += 1;
    }
    mult
}

const fn build_mult4() -> [usize; 15] {
    let mut mult = [0; 15];
    let mut n = 0;
    while n < 81 {
        mult[MI4[n / 27][n / 9 % 3][n / 3 % 3][n % 3]] += 1;
        n += 1;
    }
    mult
}
